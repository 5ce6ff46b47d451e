use anyhow::Result;
use trackmove::{Collection, MatchPolicy};

use super::format;

pub async fn run(left: &mut Collection, right: &mut Collection, policy: &MatchPolicy) -> Result<()> {
    let diff = trackmove::diff(left, right, policy).await?;
    format::print_diff(&diff);
    Ok(())
}
