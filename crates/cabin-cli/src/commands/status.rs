use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use cabin_core::Manager;

pub fn run(manager: &Manager, name: &str, json: bool) -> Result<u8, String> {
    let report = manager.status(name).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("name:       {}", report.name);
    println!("state:      {}", colorize_state(report.state));
    println!("definition: {}", report.content_dir.display());
    if let Some(tag) = &report.image_tag {
        println!("image:      {tag}");
    }
    if let Some(hostname) = &report.hostname {
        println!("hostname:   {hostname}");
    }
    if let Some(built_at) = &report.built_at {
        match report.built_with_version.as_deref() {
            Some(version) if !version.is_empty() => {
                println!("built:      {built_at} (cabin {version})");
            }
            _ => println!("built:      {built_at}"),
        }
    }
    if !report.path_mappings.is_empty() {
        println!("shared paths:");
        for mapping in &report.path_mappings {
            println!(
                "  {} -> {} ({})",
                mapping.host_path.display(),
                mapping.guest_path.display(),
                mapping.consistency.as_str()
            );
        }
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(EXIT_SUCCESS)
}
