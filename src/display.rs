use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, PoisonError,
};

use crate::{service::ServiceRecord, OtpCode, OtpError};

/// Something a freshly computed code can be written to.
pub trait CodeSurface: Send + Sync {
    fn show_code(&self, code: &OtpCode);
    fn show_failure(&self, error: &OtpError);

    /// Seconds until the shown code expires
    fn show_countdown(&self, _seconds: u64) {}
}

/// The last thing written to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeState {
    /// Nothing computed yet
    Pending,
    Ready(OtpCode),
    /// The last computation failed, with the error message
    Failed(String),
}

/// Per-service presentation record.
#[derive(Debug)]
pub struct DisplayEntry {
    service: String,
    account: Option<String>,
    icon: Option<String>,
    delta_steps: i64,
    grouped: bool,
    state: Mutex<CodeState>,
    countdown: AtomicU64,
}

impl DisplayEntry {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: None,
            icon: None,
            delta_steps: 0,
            grouped: true,
            state: Mutex::new(CodeState::Pending),
            countdown: AtomicU64::new(0),
        }
    }

    pub fn from_service(service: &ServiceRecord) -> Self {
        let mut entry = Self::new(service.name.as_str());
        entry.account = service.account_label().map(str::to_string);
        entry.icon = service.icon_reference().map(str::to_string);

        entry
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Shows the code `delta_steps` periods away from the current one
    pub fn with_delta(mut self, delta_steps: i64) -> Self {
        self.delta_steps = delta_steps;
        self
    }

    pub fn with_grouping(mut self, grouped: bool) -> Self {
        self.grouped = grouped;
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    pub fn delta_steps(&self) -> i64 {
        self.delta_steps
    }

    pub fn state(&self) -> CodeState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The code as shown to the user, `None` while pending or failed.
    pub fn rendered(&self) -> Option<String> {
        match self.state() {
            CodeState::Ready(code) if self.grouped => Some(code.grouped()),
            CodeState::Ready(code) => Some(code.to_string()),
            _ => None,
        }
    }

    pub fn countdown(&self) -> u64 {
        self.countdown.load(Ordering::Relaxed)
    }

    pub fn set_countdown(&self, seconds: u64) {
        self.countdown.store(seconds, Ordering::Relaxed);
    }

    fn set_state(&self, state: CodeState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl CodeSurface for DisplayEntry {
    fn show_code(&self, code: &OtpCode) {
        self.set_state(CodeState::Ready(*code));
    }

    fn show_failure(&self, error: &OtpError) {
        self.set_state(CodeState::Failed(error.to_string()));
        // No code, so nothing is counting down
        self.set_countdown(0);
    }

    fn show_countdown(&self, seconds: u64) {
        self.set_countdown(seconds);
    }
}

/// Shared clipboard the current code gets copied to.
pub trait Clipboard: Send + Sync {
    fn write_text(&self, text: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// In-process clipboard.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn contents(&self) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn write_text(&self, text: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        *self.contents.lock().unwrap_or_else(PoisonError::into_inner) = Some(text.to_string());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("No code has been computed for {0} yet")]
    NoCode(String),
    #[error("The last code for {service} could not be computed: {reason}")]
    Failed { service: String, reason: String },
    #[error("Could not write to the clipboard")]
    Clipboard(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Copies the code currently shown by `entry`, without recomputing it,
/// so the clipboard always matches the screen. Returns the copied digits.
pub fn copy_current_code(entry: &DisplayEntry, clipboard: &dyn Clipboard) -> Result<String, CopyError> {
    let code = match entry.state() {
        CodeState::Ready(code) => code.to_string(),
        CodeState::Pending => {
            log::error!("No current code for {}", entry.service());
            return Err(CopyError::NoCode(entry.service().to_string()));
        }
        CodeState::Failed(reason) => {
            return Err(CopyError::Failed {
                service: entry.service().to_string(),
                reason,
            })
        }
    };

    clipboard.write_text(&code).map_err(CopyError::Clipboard)?;
    log::debug!("Copied the current code of {}", entry.service());

    Ok(code)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{copy_current_code, CodeState, CodeSurface, CopyError, DisplayEntry, MemoryClipboard};
    use crate::{OtpCode, OtpError};

    #[test]
    fn new_entry_is_pending() {
        let entry = DisplayEntry::new("GitHub");

        assert_eq!(CodeState::Pending, entry.state());
        assert_eq!(None, entry.rendered());
    }

    #[test]
    fn rendered_code_is_grouped_by_default() {
        let entry = DisplayEntry::new("GitHub");
        entry.show_code(&OtpCode::new(123456, 6));
        assert_eq!(Some("123 456".to_string()), entry.rendered());

        let plain = DisplayEntry::new("GitLab").with_grouping(false);
        plain.show_code(&OtpCode::new(42, 6));
        assert_eq!(Some("000042".to_string()), plain.rendered());
    }

    #[test]
    fn failure_is_distinguishable_from_pending() {
        let entry = DisplayEntry::new("GitHub");
        entry.show_failure(&OtpError::InvalidPeriod);

        assert!(matches!(entry.state(), CodeState::Failed(_)));
        assert_eq!(None, entry.rendered());
    }

    #[test]
    fn failure_clears_the_countdown() {
        let entry = DisplayEntry::new("GitHub");
        entry.show_code(&OtpCode::new(782699, 6));
        entry.show_countdown(12);

        entry.show_failure(&OtpError::InvalidPeriod);

        assert_eq!(0, entry.countdown());
    }

    #[test]
    fn copy_takes_the_last_written_code() {
        let entry = DisplayEntry::new("GitHub");
        let clipboard = MemoryClipboard::default();
        entry.show_code(&OtpCode::new(782699, 6));

        let copied = copy_current_code(&entry, &clipboard).unwrap();

        assert_eq!("782699", copied);
        assert_eq!(Some("782699".to_string()), clipboard.contents());
    }

    #[test]
    fn copy_without_code_leaves_clipboard_alone() {
        let entry = DisplayEntry::new("GitHub");
        let clipboard = MemoryClipboard::default();

        assert!(matches!(
            copy_current_code(&entry, &clipboard),
            Err(CopyError::NoCode(_))
        ));
        assert_eq!(None, clipboard.contents());

        entry.show_failure(&OtpError::InvalidPeriod);
        assert!(matches!(
            copy_current_code(&entry, &clipboard),
            Err(CopyError::Failed { .. })
        ));
    }
}
