//! Build pipeline stages.
//!
//! - `prep`: prerequisites, project input, scratch workspace (steps 1-3)
//! - `compile`: runtime compilation (step 4)
//! - `shaders` / `package`: shader precompilation and the pack directory (step 5)
//! - `artifact` / `solution`: final artifact and clean solution export (step 6)
//! - `verify`: artifact check and size budget (step 7)
//!
//! Each stage is a plain function of the request and the outputs of earlier
//! stages, so they can be tested on their own.

pub mod artifact;
pub mod compile;
pub mod package;
pub mod prep;
pub mod shaders;
pub mod solution;
pub mod verify;
