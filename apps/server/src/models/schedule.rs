//! Recurring delivery schedules attached to a search definition

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The (local date, hour) a schedule fired in. Compared for equality to prevent
/// firing twice within one eligible hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunWindow {
    pub date: NaiveDate,
    pub hour: u8,
}

impl fmt::Display for RunWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:00", self.date, self.hour)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferProtocol {
    Ftp,
    Sftp,
}

impl TransferProtocol {
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Ftp => 21,
            Self::Sftp => 22,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ftp => "ftp",
            Self::Sftp => "sftp",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferTarget {
    pub protocol: TransferProtocol,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub remote_folder: Option<String>,
}

impl FileTransferTarget {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    /// Remote path for a file, joined onto the configured folder.
    pub fn remote_path(&self, filename: &str) -> String {
        match self.remote_folder.as_deref().map(|f| f.trim_end_matches('/')) {
            Some(folder) if !folder.is_empty() => format!("{folder}/{filename}"),
            _ => filename.to_string(),
        }
    }
}

impl fmt::Debug for FileTransferTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTransferTarget")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remote_folder", &self.remote_folder)
            .finish()
    }
}

/// Where a scheduled run's output goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Destination {
    Email {
        recipients: Vec<String>,
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        body: Option<String>,
    },
    FileTransfer(FileTransferTarget),
}

impl Destination {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Email { .. } => "email",
            Self::FileTransfer(_) => "file_transfer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub id: i64,
    pub destination: Destination,
    #[serde(default)]
    pub run_monday: bool,
    #[serde(default)]
    pub run_tuesday: bool,
    #[serde(default)]
    pub run_wednesday: bool,
    #[serde(default)]
    pub run_thursday: bool,
    #[serde(default)]
    pub run_friday: bool,
    #[serde(default)]
    pub run_saturday: bool,
    #[serde(default)]
    pub run_sunday: bool,
    /// Hour of day (0-23) in the owning user's timezone.
    pub run_hour: u8,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_fired_window: Option<RunWindow>,
    #[serde(default)]
    pub consecutive_failure_count: i32,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub disabled_reason: Option<String>,
}

impl Schedule {
    pub fn new(destination: Destination, run_hour: u8) -> Self {
        Self {
            id: 0,
            destination,
            run_monday: false,
            run_tuesday: false,
            run_wednesday: false,
            run_thursday: false,
            run_friday: false,
            run_saturday: false,
            run_sunday: false,
            run_hour,
            last_run_at: None,
            last_fired_window: None,
            consecutive_failure_count: 0,
            disabled: false,
            disabled_reason: None,
        }
    }

    pub fn runs_on(&self, day: Weekday) -> bool {
        match day {
            Weekday::Mon => self.run_monday,
            Weekday::Tue => self.run_tuesday,
            Weekday::Wed => self.run_wednesday,
            Weekday::Thu => self.run_thursday,
            Weekday::Fri => self.run_friday,
            Weekday::Sat => self.run_saturday,
            Weekday::Sun => self.run_sunday,
        }
    }

    pub fn set_day(&mut self, day: Weekday, enabled: bool) {
        let flag = match day {
            Weekday::Mon => &mut self.run_monday,
            Weekday::Tue => &mut self.run_tuesday,
            Weekday::Wed => &mut self.run_wednesday,
            Weekday::Thu => &mut self.run_thursday,
            Weekday::Fri => &mut self.run_friday,
            Weekday::Sat => &mut self.run_saturday,
            Weekday::Sun => &mut self.run_sunday,
        };
        *flag = enabled;
    }

    pub fn any_day_enabled(&self) -> bool {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .any(|d| self.runs_on(d))
    }

    /// The window `now` falls in for this schedule, if any.
    ///
    /// With `catch_up` the window stays open for the rest of the local day once
    /// `run_hour` has passed, so a runner that was down at `run_hour` still fires
    /// later that day. Without it only the exact hour qualifies.
    pub fn eligible_window(&self, tz: Tz, now: DateTime<Utc>, catch_up: bool) -> Option<RunWindow> {
        let local = now.with_timezone(&tz);
        if !self.runs_on(local.weekday()) {
            return None;
        }
        let hour = local.hour();
        let run_hour = u32::from(self.run_hour);
        let open = if catch_up {
            hour >= run_hour
        } else {
            hour == run_hour
        };
        open.then(|| RunWindow {
            date: local.date_naive(),
            hour: self.run_hour,
        })
    }

    /// The window to fire in now, or `None` when disabled, not eligible, or
    /// already fired in this window.
    pub fn due_window(&self, tz: Tz, now: DateTime<Utc>, catch_up: bool) -> Option<RunWindow> {
        if self.disabled {
            return None;
        }
        let window = self.eligible_window(tz, now, catch_up)?;
        if self.last_fired_window == Some(window) {
            return None;
        }
        Some(window)
    }

    /// Forget run history, e.g. for a schedule created by copying another.
    pub fn clear_run_state(&mut self) {
        self.last_run_at = None;
        self.last_fired_window = None;
        self.consecutive_failure_count = 0;
        if !self.disabled {
            self.disabled_reason = None;
        }
    }

    /// Keep run bookkeeping from `previous` when a schedule is resubmitted.
    pub fn carry_run_state_from(&mut self, previous: &Schedule) {
        self.last_run_at = previous.last_run_at;
        self.last_fired_window = previous.last_fired_window;
        // Re-enabling a disabled schedule starts its failure count over.
        self.consecutive_failure_count = if previous.disabled && !self.disabled {
            0
        } else {
            previous.consecutive_failure_count
        };
        self.disabled_reason = if self.disabled {
            previous.disabled_reason.clone()
        } else {
            None
        };
        // Clients see redacted passwords; an empty one means "unchanged".
        if let (Destination::FileTransfer(next), Destination::FileTransfer(prev)) =
            (&mut self.destination, &previous.destination)
        {
            if next.password.is_empty() {
                next.password = prev.password.clone();
            }
        }
    }

    /// Copy safe to return to clients.
    pub fn redacted(&self) -> Schedule {
        let mut copy = self.clone();
        if let Destination::FileTransfer(target) = &mut copy.destination {
            target.password.clear();
        }
        copy
    }
}
