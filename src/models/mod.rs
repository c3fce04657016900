pub mod health;
pub mod diagnostics;
pub mod error;
pub mod messages;
pub mod session;
pub mod ids;
pub mod session_create;
pub mod session_join;
pub mod session_status;
pub mod session_end;

pub use health::*;
pub use diagnostics::*;
pub use error::*;
pub use messages::*;
pub use session::*;
pub use session_create::*;
pub use session_join::*;
pub use session_status::*;
pub use session_end::*;
