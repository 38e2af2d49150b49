use anyhow::{Context, Result};
use zbus::proxy;

#[proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
pub trait Rollcall {
    fn cancel(&self) -> zbus::Result<String>;
    fn progress(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
    fn entries(&self, user: &str, date: &str) -> zbus::Result<String>;
}

/// Connect to the running daemon.
pub async fn connect(session_bus: bool) -> Result<RollcallProxy<'static>> {
    let conn = if session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;

    RollcallProxy::new(&conn)
        .await
        .context("is rollcalld running?")
}
