//! Check command for the field exporter
//!
//! Resolves a source apiVersion offline, with the same allow-list the
//! controller is configured with.

use anyhow::Result;
use field_exporter::config::ControllerConfig;
use field_exporter::controller::reconciler::group::GroupResolver;

/// Check whether `api_version` would be accepted as an export source
pub fn check_api_version_command(api_version: &str) -> Result<()> {
    let config = ControllerConfig::from_env();
    let resolver = GroupResolver::new(config.supported_group_suffixes.iter().cloned());

    println!("► checking apiVersion {api_version}");
    println!("  supported groups: {}", resolver.suffixes().join(", "));

    match resolver.resolve(api_version) {
        Ok((group, version)) => {
            println!("✔ group {group}, version {version} is supported");
            Ok(())
        }
        Err(e) => {
            println!("✗ {e}");
            Err(e.into())
        }
    }
}
