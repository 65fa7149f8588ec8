use super::{json_pretty, maybe_spinner, spin_fail, spin_ok, EXIT_SUCCESS};
use cabin_core::Manager;

pub fn run(manager: &Manager, name: &str, json: bool) -> Result<u8, String> {
    let pb = maybe_spinner(json, &format!("stopping {name}..."));
    let stopped = match manager.stop(name) {
        Ok(stopped) => stopped,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "stop failed");
            }
            return Err(e.to_string());
        }
    };
    if let Some(ref pb) = pb {
        if stopped {
            spin_ok(pb, &format!("stopped environment '{name}'"));
        } else {
            spin_ok(pb, &format!("environment '{name}' is not running"));
        }
    }
    if json {
        let payload = serde_json::json!({
            "name": name,
            "stopped": stopped
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
