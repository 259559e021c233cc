use cellwire_frame::{lane_name, COMMAND, CONTROL, VALUE};
use cellwire_worker::Tag;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("cellwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: cellwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CELLWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("lanes: {}", lanes_summary());
    println!("tags: {}", tags_summary());

    Ok(SUCCESS)
}

fn lanes_summary() -> String {
    [CONTROL, VALUE, COMMAND]
        .iter()
        .map(|lane| format!("{lane}={}", lane_name(*lane)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn tags_summary() -> String {
    Tag::ALL
        .iter()
        .map(|tag| format!("{tag} ({})", lane_name(tag.lane())))
        .collect::<Vec<_>>()
        .join(", ")
}
