//! Streaming sign-language recognition with multiplayer game rooms.
//!
//! The core turns a live stream of hand-landmark frames into stable sign
//! predictions and coordinates concurrent users inside shared rooms:
//!
//! - [`preprocess`] coerces raw frames to a fixed shape, smooths them and
//!   normalizes to wrist-relative coordinates;
//! - [`features`] converts a window of frames into the fixed-length vector
//!   the trained classifier expects, the same code path for offline
//!   evaluation and live inference;
//! - [`classifier`] wraps the pre-trained model artifact;
//! - [`session`] buffers each user's frames, rate-limits inference and
//!   smooths raw predictions;
//! - [`room`] tracks membership, gates game start on a camera-readiness
//!   barrier and persists scores at most once per game;
//! - [`pipeline`] wires it all together over channels, one worker thread
//!   per connected client.
//!
//! Pose tracking, authentication, the datastore and the training procedure
//! are external collaborators reached only through narrow interfaces.

pub mod classifier;
pub mod config;
pub mod eval;
pub mod events;
pub mod features;
pub mod persistence;
pub mod pipeline;
pub mod preprocess;
pub mod room;
pub mod session;
pub mod types;
