use std::path::Path;

use anyhow::{ensure, Result};
use grainsplit_core::scale;
use tracing::info;

pub fn scale_handler(input: &Path, output: &Path, factor: f64) -> Result<()> {
    ensure!(
        factor.is_finite() && factor >= 0.0,
        "Scale factor must be a non-negative number, got {factor}"
    );

    if input.is_dir() {
        let written = scale::scale_noise_models(input, output, factor)?;
        info!(
            "scaled {written} grain tables into {output}",
            output = output.display()
        );
    } else {
        ensure!(input.is_file(), "Grain table {:?} does not exist!", input);
        scale::scale_noise_model(input, output, factor)?;
        info!(
            "scaled {input} into {output}",
            input = input.display(),
            output = output.display()
        );
    }
    Ok(())
}
