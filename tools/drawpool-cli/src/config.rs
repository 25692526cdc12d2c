//! Config command - print the default configuration

use anyhow::Result;
use drawpool::PoolConfig;

/// Execute the config command
pub fn execute() -> Result<()> {
    print!("{}", PoolConfig::default().to_toml_string()?);
    Ok(())
}
