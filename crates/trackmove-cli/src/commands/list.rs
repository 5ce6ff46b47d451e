use anyhow::Result;
use trackmove::Collection;

use super::format;

pub async fn run(collection: &mut Collection) -> Result<()> {
    let activities = collection.activities().await?;
    format::print_activity_table(activities);
    Ok(())
}
