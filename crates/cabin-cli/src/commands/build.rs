use super::{json_pretty, EXIT_SUCCESS};
use cabin_core::{BuildOptions, Manager};

pub fn run(manager: &Manager, name: &str, no_cache: bool, json: bool) -> Result<u8, String> {
    // No spinner: the engine streams its own build output.
    if !json {
        eprintln!("building environment '{name}'...");
    }
    let outcome = manager
        .build(name, BuildOptions { no_cache })
        .map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "name": name,
            "image_tag": outcome.image_tag.as_str(),
            "build_digest": outcome.build_digest,
            "stopped_running": outcome.stopped_running,
            "status": "built"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        if outcome.stopped_running {
            println!("stopped the running instance of '{name}' for the rebuild");
        }
        println!("built environment '{name}' ({})", outcome.image_tag);
        println!("digest: {}", outcome.build_digest);
    }
    Ok(EXIT_SUCCESS)
}
