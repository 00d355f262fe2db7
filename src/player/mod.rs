//! Player side of the engine: the client-facing control, the player thread
//! and the cross-fade planner.

pub mod control;
pub mod cross_fade;

pub(crate) mod thread;

pub use control::{PlayerControl, PlayerErrorKind, PlayerState, PlayerStatus};
pub use cross_fade::CrossFadeSettings;
