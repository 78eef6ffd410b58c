mod controller;
mod state;
pub mod view;

pub use controller::{alert_message, AlarmController, RefreshError};
pub use state::{next_prayer, LastPlayedRegistry};
pub use view::{ScheduleView, TerminalView};
