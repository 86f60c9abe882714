//! Chartpax's client functionality modules.

mod apistub;
mod ctrlstub;
mod session;

pub use apistub::ClientApiStub;
pub use ctrlstub::ClientCtrlStub;
pub use session::EditorSession;
