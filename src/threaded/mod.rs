//! Multi-unit execution.
//!
//! Every launch runs a fixed number of compute units, each one a scoped OS
//! thread with a static share of the work. There is no work stealing.
//!
//! Available pieces:
//! - `launch`: the unit pool and the shared output buffer
//! - `padding_pass`: whole-operand reformat on the vector units
//! - `grouped`: grouped and batched problems with carry-over rotation

pub mod grouped;
pub mod launch;
pub mod padding_pass;
