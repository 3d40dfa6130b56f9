// Physical input simulation and process launch.
use async_trait::async_trait;

use crate::errors::{OrdenadorError, OrdenadorResult};

/// Low-level pointer / keyboard / process driver.
#[async_trait]
pub trait ActionDriver: Send + Sync {
    async fn click(&self, x: i32, y: i32) -> OrdenadorResult<()>;

    async fn type_text(&self, text: &str) -> OrdenadorResult<()>;

    async fn launch(&self, path: &str, args: &[String]) -> OrdenadorResult<()>;
}

/// Spawn `path` detached. A missing executable maps to
/// [`OrdenadorError::ProgramNotFound`].
pub async fn launch_process(path: &str, args: &[String]) -> OrdenadorResult<()> {
    let mut command = tokio::process::Command::new(path);
    command
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    match command.spawn() {
        Ok(child) => {
            tracing::info!(path = %path, pid = ?child.id(), "program launched");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(OrdenadorError::ProgramNotFound(path.to_string()))
        }
        Err(e) => Err(OrdenadorError::Executor(format!("spawn {path}: {e}"))),
    }
}

/// enigo-backed driver. Each call builds its own connection on a blocking
/// thread, since the enigo handle is not `Send` on every platform.
#[cfg(feature = "desktop")]
#[derive(Default)]
pub struct DesktopDriver;

#[cfg(feature = "desktop")]
impl DesktopDriver {
    pub fn new() -> Self {
        Self
    }

    async fn with_enigo<F>(op: F) -> OrdenadorResult<()>
    where
        F: FnOnce(&mut enigo::Enigo) -> Result<(), enigo::InputError> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let mut enigo = enigo::Enigo::new(&enigo::Settings::default())
                .map_err(|e| OrdenadorError::Executor(format!("input connection: {e}")))?;
            op(&mut enigo).map_err(|e| OrdenadorError::Executor(e.to_string()))
        })
        .await
        .map_err(|e| OrdenadorError::Executor(format!("input task: {e}")))?
    }
}

#[cfg(feature = "desktop")]
#[async_trait]
impl ActionDriver for DesktopDriver {
    async fn click(&self, x: i32, y: i32) -> OrdenadorResult<()> {
        use enigo::{Button, Coordinate, Direction, Mouse};
        Self::with_enigo(move |e| {
            e.move_mouse(x, y, Coordinate::Abs)?;
            e.button(Button::Left, Direction::Click)
        })
        .await
    }

    async fn type_text(&self, text: &str) -> OrdenadorResult<()> {
        use enigo::Keyboard;
        let text = text.to_string();
        Self::with_enigo(move |e| e.text(&text)).await
    }

    async fn launch(&self, path: &str, args: &[String]) -> OrdenadorResult<()> {
        launch_process(path, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let err = launch_process("ordenador-definitely-missing-binary", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, OrdenadorError::ProgramNotFound(p) if p == "ordenador-definitely-missing-binary"));
    }
}
