use std::path::Path;

use anyhow::{ensure, Result};
use grainsplit_core::{split::SplitPlan, util, verify};

pub fn verify_handler(input: &Path, split_dir: &Path, plan_path: &Path) -> Result<()> {
    util::validate_tools(&["ffmpeg"])?;
    let input = util::to_absolute_path(input)?;
    ensure!(input.exists(), "Input file {:?} does not exist!", input);
    ensure!(
        split_dir.is_dir(),
        "Segment directory {:?} does not exist!",
        split_dir
    );

    let plan = SplitPlan::from_file(plan_path)?;
    verify::verify_segments(&input, split_dir, &plan.segments)?;
    Ok(())
}
