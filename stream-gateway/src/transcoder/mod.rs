mod process;
mod profile;

pub use process::{ProcessSupervisor, TranscoderProcess};
pub use profile::HlsProfile;
