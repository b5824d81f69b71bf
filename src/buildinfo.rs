// Build/version metadata captured by build.rs, surfaced for panic reports
// and the boot banner.

pub const GIT_COMMIT: &str = env!("GIT_COMMIT");
pub const GIT_BRANCH: &str = env!("GIT_BRANCH");
pub const GIT_DIRTY: &str = env!("GIT_DIRTY");
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const TARGET: &str = env!("TARGET");
pub const PROFILE: &str = env!("PROFILE");

/// One-line build summary for panic reports and the boot banner.
pub const SUMMARY: &str = concat!(
    env!("GIT_BRANCH"), "@", env!("GIT_COMMIT"),
    " (", env!("PROFILE"), ", ", env!("TARGET"), ")",
);
