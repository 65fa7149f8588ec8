use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use cabin_core::{EnvState, Manager};
use dialoguer::Confirm;
use std::io::{stderr, stdin, IsTerminal};
use std::path::Path;

pub fn create(manager: &Manager, name: &str, dir: &Path, json: bool) -> Result<u8, String> {
    let record = manager.image_create(name, dir).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "name": name,
            "content_dir": record.content_dir,
            "status": "created"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "created image '{name}', edit {} and run 'cabin build {name}'",
            record.content_dir.join(cabin_schema::DEFINITION_FILE).display()
        );
    }
    Ok(EXIT_SUCCESS)
}

pub fn import(manager: &Manager, name: &str, dir: &Path, json: bool) -> Result<u8, String> {
    let record = manager.image_import(name, dir).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "name": name,
            "content_dir": record.content_dir,
            "status": "imported"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "imported image '{name}' from {}",
            record.content_dir.display()
        );
    }
    Ok(EXIT_SUCCESS)
}

pub fn list(manager: &Manager, json: bool) -> Result<u8, String> {
    let images = manager.image_list().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&images)?);
    } else if images.is_empty() {
        println!("no images found");
    } else {
        println!("{:<20} {:<10} DEFINITION", "NAME", "STATE");
        for image in &images {
            println!(
                "{:<20} {:<10} {}",
                image.name,
                colorize_state(image.state),
                image.content_dir.display()
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

/// Ask before stopping a running instance. Without a terminal the answer is
/// no, so scripts have to pass `--force`.
fn confirm_stop(name: &str, is_tty: bool) -> Result<bool, String> {
    if !is_tty {
        return Ok(false);
    }
    Confirm::new()
        .with_prompt(format!("'{name}' is running, stop it and remove the image?"))
        .default(false)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))
}

pub fn remove(manager: &Manager, name: &str, force: bool, json: bool) -> Result<u8, String> {
    let mut force = force;
    if !force && manager.state(name).map_err(|e| e.to_string())? == EnvState::Running {
        let is_tty = !json && stdin().is_terminal() && stderr().is_terminal();
        force = confirm_stop(name, is_tty)?;
    }
    manager
        .image_remove(name, force)
        .map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "name": name,
            "status": "removed"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("removed image '{name}'");
    }
    Ok(EXIT_SUCCESS)
}
