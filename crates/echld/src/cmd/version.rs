use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("echld {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: echld");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", env!("ECHLD_BUILD_TARGET"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "frame: header={} bytes, max_payload={} bytes",
        echld_frame::HEADER_SIZE,
        echld_frame::MAX_PAYLOAD
    );

    Ok(SUCCESS)
}
