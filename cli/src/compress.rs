use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Args;
use imgpca::{compress_with, ComponentCount, CompressOptions, Fault};
use tracing::{error, info};

use crate::util::{self, InputError};

const CLIENT_FAULT: u8 = 2;
const INTERNAL_FAULT: u8 = 1;

/// Compress an image by keeping the top k principal components of each
/// colour channel
#[derive(Debug, Args)]
#[command(version, about, long_about = None)]
pub struct CompressArgs {
    /// Number of principal components to keep, 1 to 2000
    #[arg(short, default_value_t = 50)]
    k: usize,
    /// Output file. Defaults to <FILENAME>_compressed.jpg, or stdout when
    /// reading from stdin
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Media type of the input, e.g. image/png. Guessed when not given
    #[arg(long)]
    media_type: Option<String>,
    /// Reduce the colour channels one after another
    #[arg(long)]
    sequential: bool,
    /// Image file. Reads stdin when not given
    filename: Option<PathBuf>,
}

pub fn compress_main(args: CompressArgs) -> ExitCode {
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error processing image: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(args: &CompressArgs) -> Result<()> {
    let k = ComponentCount::new(args.k)?;
    let input = util::read_input(&args.filename)?;
    let media_type = util::media_type(args.media_type.as_deref(), &args.filename, &input);
    util::ensure_image(&media_type)?;

    let name = args.filename
        .as_ref()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "<stdin>".to_string());
    info!("Processing image: {} with k={}", name, k.get());

    let options = CompressOptions {
        parallel: !args.sequential,
    };
    let output = compress_with(&input, k, &options)?;
    info!("Image compression completed successfully");

    let destination = args.output
        .clone()
        .or_else(|| args.filename.as_deref().map(util::output_path));
    match &destination {
        Some(path) => fs::write(path, &output)
            .with_context(|| format!("Writing {}", path.to_string_lossy()))?,
        None => io::stdout()
            .lock()
            .write_all(&output)
            .context("Writing stdout")?,
    }

    eprintln!(
        "{} -> {} ({}% smaller){}",
        util::format_bytes(input.len() as u64, 2),
        util::format_bytes(output.len() as u64, 2),
        util::reduction_percent(input.len() as u64, output.len() as u64),
        destination
            .map(|p| format!(", written to {}", p.to_string_lossy()))
            .unwrap_or_default(),
    );
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<InputError>().is_some() {
        return CLIENT_FAULT;
    }
    match Fault::of(err) {
        Fault::ClientInput => CLIENT_FAULT,
        Fault::Internal => INTERNAL_FAULT,
    }
}

#[cfg(test)]
mod tests {
    use imgpca::{linalg::MatrixError, ComponentError, PipelineError};

    use super::*;

    #[test]
    fn test_exit_code_client_faults() {
        let not_image: anyhow::Error = InputError::NotAnImage("text/plain".into()).into();
        let out_of_range: anyhow::Error = ComponentError::OutOfRange(0).into();
        let decode = anyhow::Error::msg("bad header").context(PipelineError::Decode);

        assert_eq!(exit_code(&not_image), CLIENT_FAULT);
        assert_eq!(exit_code(&out_of_range), CLIENT_FAULT);
        assert_eq!(exit_code(&decode), CLIENT_FAULT);
    }

    #[test]
    fn test_exit_code_internal_faults() {
        let numeric: anyhow::Error = MatrixError::NoConvergence.into();
        let encode = anyhow::Error::msg("io").context(PipelineError::Encode);

        assert_eq!(exit_code(&numeric), INTERNAL_FAULT);
        assert_eq!(exit_code(&encode), INTERNAL_FAULT);
    }

    #[test]
    fn test_run_rejects_out_of_range_k() {
        let args = CompressArgs {
            k: 2001,
            output: None,
            media_type: None,
            sequential: false,
            filename: None,
        };

        let err = run(&args).unwrap_err();

        assert_eq!(err.downcast_ref::<ComponentError>(), Some(&ComponentError::OutOfRange(2001)));
    }
}
