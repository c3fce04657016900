pub mod health;
pub mod diagnostics;
pub mod session_create;
pub mod session_join;
pub mod session_end;
pub mod session_status;
pub mod ws;

pub use health::*;
pub use diagnostics::*;
pub use session_create::*;
pub use session_join::*;
pub use session_end::*;
pub use session_status::*;
pub use ws::*;
