//! Control a running cluster with `scontrol`.

use crate::sys::CommandRunner;
use crate::Result;
use tracing::debug;

/// Run `scontrol <args>` and return its standard output.
///
/// # Errors
///
/// [`crate::Error::Command`] carrying the exit code and stderr when
/// `scontrol` exits non-zero.
///
/// # Examples
///
/// ```no_run
/// use slurm_ops::scontrol::scontrol;
/// use slurm_ops::sys::SystemRunner;
///
/// scontrol(&SystemRunner::default(), &["reconfigure"])?;
/// # Ok::<(), slurm_ops::Error>(())
/// ```
pub fn scontrol(runner: &dyn CommandRunner, args: &[&str]) -> Result<String> {
    debug!("scontrol {}", args.join(" "));
    Ok(runner.call("scontrol", args)?.stdout)
}
