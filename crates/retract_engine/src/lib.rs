//! Retract engine: browser session capability, the withdrawal loop and
//! CSV import/export around it.
mod engine;
mod persist;
mod roster;
mod scan;
mod selectors;
mod session;
mod types;
mod webdriver;

pub use engine::{WithdrawEngine, WithdrawSettings};
pub use persist::{ensure_output_dir, write_atomic, PersistError};
pub use roster::{
    read_roster, target_set_from_rows, timestamped_filename, write_candidates,
    write_withdrawal_log, RosterError, RosterRow, WithdrawnLogRow,
};
pub use scan::InspectError;
pub use selectors::{
    click_in_card_chain, click_on_page_chain, extract_field, ClickStrategy, FieldStrategy,
    ProfileError, SiteProfile,
};
pub use session::{CardHandle, ListSession, SessionError};
pub use types::{
    CancelFlag, CardFault, ChannelProgressSink, EngineEvent, FailedAttempt, ListError,
    NullProgressSink, ProgressSink, WithdrawFailure, WithdrawReport,
};
pub use webdriver::{WebDriverListSession, WebDriverSettings};
