//! CLI command implementations.
//!
//! | Module        | Commands handled |
//! |---------------|------------------|
//! | `review`      | `Review`         |
//! | `checkpoints` | `Checkpoints`    |
//! | `validate`    | `Validate`       |

pub mod checkpoints;
pub mod review;
pub mod validate;

pub use checkpoints::cmd_checkpoints;
pub use review::cmd_review;
pub use validate::cmd_validate;
