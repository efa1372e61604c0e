pub trait LogError<T> {
    fn log_error(self) -> Option<T>;
    fn log_warn(self) -> Option<T>;
}

impl<T> LogError<T> for Result<T, anyhow::Error> {
    fn log_error(self) -> Option<T> {
        match self {
            Ok(data) => Some(data),
            Err(e) => {
                log::error!("{:?}", e);
                None
            }
        }
    }

    /// best-effort steps that should not abort a run
    fn log_warn(self) -> Option<T> {
        match self {
            Ok(data) => Some(data),
            Err(e) => {
                log::warn!("{:#}", e);
                None
            }
        }
    }
}
