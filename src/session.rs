//! Operator capture session.
//!
//! A line-oriented command loop over an abstract input/output pair: `c` runs
//! one timed capture cycle, `x` exits, blank lines are ignored, anything else
//! is echoed as unrecognized. Per-cycle failures are matched on and reported;
//! none of them ends the session.

use std::io::{BufRead, Write};
use std::time::Instant;

use crate::pipeline::{CycleError, Pipeline, UploadStatus};
use crate::source::FrameSource;

/// Drive the session until the operator exits or input ends.
pub fn run<R, W>(
    source: &mut dyn FrameSource,
    pipeline: &Pipeline,
    mut input: R,
    mut out: W,
) -> std::io::Result<()>
where
    R: BufRead,
    W: Write,
{
    loop {
        write!(out, "Enter 'c' to capture, 'x' to exit: ")?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            // End of input behaves like an exit command.
            break;
        }
        let cmd = line.trim().to_lowercase();
        match cmd.as_str() {
            "c" => {
                let started = Instant::now();
                run_cycle(source, pipeline, &mut out)?;
                writeln!(out, "Cycle time: {:.2}s", started.elapsed().as_secs_f64())?;
            }
            "x" => break,
            "" => continue,
            other => writeln!(out, "Unknown command: '{}'", other)?,
        }
    }
    Ok(())
}

fn run_cycle<W: Write>(
    source: &mut dyn FrameSource,
    pipeline: &Pipeline,
    out: &mut W,
) -> std::io::Result<()> {
    match pipeline.run_cycle(source) {
        Ok(report) => {
            writeln!(out, "Saved {}", report.saved_path.display())?;
            match report.upload {
                Some(UploadStatus::Accepted(receipt)) => {
                    writeln!(out, "Uploaded (status {})", receipt.status)?;
                }
                Some(UploadStatus::Failed(reason)) => {
                    writeln!(out, "Upload failed: {}", reason)?;
                }
                None => {}
            }
        }
        Err(CycleError::NoFrame) => {
            writeln!(out, "Captured image is empty; try again.")?;
        }
        Err(err @ CycleError::Acquire(_)) => {
            log::error!("acquisition failed: {}", err);
            writeln!(out, "Capture failed: {}", err)?;
        }
        Err(err @ CycleError::Encode(_)) => {
            log::error!("encoding failed: {}", err);
            writeln!(out, "Encoding failed: {}", err)?;
        }
        Err(err @ CycleError::Persist { .. }) => {
            log::error!("local save failed: {}", err);
            writeln!(out, "Saving failed: {}", err)?;
        }
    }
    Ok(())
}
