//! Service command - installs a systemd unit that repeats the copy at boot
//!
//! The unit runs a generated script holding one `dd` line with the chosen
//! block size. Both devices are named by their `/dev/disk/by-id` links, so
//! the script keeps addressing the same drives after a reboot renames them.

use anyhow::{bail, Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use std::process::Command;

use autodd_core::{format_size, CopySpec, Duplicator, ServiceSettings, DEFAULT_BLOCK_SIZE};
use autodd_detect::SystemDevices;
use autodd_platform::Platform;

use super::{build_config, device_pair, require_root, GlobalArgs};

/// Arguments for the service command
pub struct ServiceArgs {
    /// Source device (path or WWID)
    pub source: Option<String>,
    /// Destination device (path or WWID)
    pub destination: Option<String>,
    /// Block size (e.g., "32K", "4M")
    pub block_size: Option<String>,
    /// Start the service immediately
    pub start: bool,
    /// Do not enable the service at boot
    pub no_enable: bool,
    /// Print the script and unit instead of installing them
    pub dry_run: bool,
}

/// Execute the service command
pub fn execute(args: ServiceArgs, global: &GlobalArgs) -> Result<()> {
    let settings = global.settings();
    let devices = device_pair(args.source, args.destination, &settings)?;
    let config = build_config(&settings, None, None)?;
    let block_size = match &args.block_size {
        Some(size) => autodd_core::parse_size(size)?,
        None => DEFAULT_BLOCK_SIZE,
    };

    let platform = Platform;
    let duplicator = Duplicator::new(&SystemDevices, &platform, &platform, config);
    let spec = duplicator
        .service_spec(&devices.source, &devices.destination, block_size)
        .context("Failed to resolve the service devices")?;

    let service = &settings.service;
    let script_path = PathBuf::from(&service.script_path);
    let unit_path = Path::new(&service.unit_dir).join(&service.unit_name);
    let script = render_script(&spec);
    let unit = render_unit(&script_path);

    if args.dry_run {
        println!("# {}", script_path.display());
        println!("{script}");
        println!("# {}", unit_path.display());
        print!("{unit}");
        return Ok(());
    }

    require_root("service")?;

    println_if!(
        global.quiet,
        "{} {} -> {} every boot with {} blocks",
        style("Service:").bold(),
        style(&spec.source).cyan(),
        style(&spec.destination).cyan(),
        format_size(block_size)
    );

    if !global.yes && !confirm_install(&spec)? {
        bail!("Aborted by user");
    }

    install(&script_path, &script, &unit_path, &unit)?;
    println_if!(
        global.quiet,
        "  {} Wrote {} and {}",
        style("✓").green(),
        script_path.display(),
        unit_path.display()
    );

    systemctl(&["daemon-reload"])?;
    if service.enable && !args.no_enable {
        systemctl(&["enable", &service.unit_name])?;
        println_if!(global.quiet, "  {} Enabled {}", style("✓").green(), service.unit_name);
    }
    if service.start || args.start {
        systemctl(&["start", &service.unit_name])?;
        println_if!(global.quiet, "  {} Started {}", style("✓").green(), service.unit_name);
    }

    print_hint(service, global.quiet);
    Ok(())
}

/// The boot script: one unbounded `dd` line, run only when both devices are present
pub fn render_script(spec: &CopySpec) -> String {
    format!(
        "#!/bin/bash\n\
         # Generated by autodd; the copy overwrites {dst} on every run.\n\
         set -e\n\
         for dev in {src} {dst}; do\n\
         \x20   if [ ! -b \"$dev\" ]; then\n\
         \x20       echo \"autodd: $dev is not attached\" >&2\n\
         \x20       exit 1\n\
         \x20   fi\n\
         done\n\
         {dd}\n",
        src = spec.source,
        dst = spec.destination,
        dd = spec.to_request().command_line()
    )
}

/// The systemd unit running `script_path`
pub fn render_unit(script_path: &Path) -> String {
    format!(
        "[Unit]\n\
         Description=autodd boot-time drive duplication\n\
         After=local-fs.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={}\n\
         Restart=on-failure\n\
         User=root\n\
         StandardOutput=journal\n\
         StandardError=journal\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        script_path.display()
    )
}

fn confirm_install(spec: &CopySpec) -> Result<bool> {
    dialoguer::Confirm::new()
        .with_prompt(format!(
            "Install a service that overwrites {} on every boot?",
            spec.destination
        ))
        .default(false)
        .interact()
        .context("Failed to get user confirmation")
}

fn install(script_path: &Path, script: &str, unit_path: &Path, unit: &str) -> Result<()> {
    if let Some(parent) = script_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(script_path, script)
        .with_context(|| format!("Failed to write {}", script_path.display()))?;
    make_executable(script_path)?;

    std::fs::write(unit_path, unit)
        .with_context(|| format!("Failed to write {}", unit_path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to make {} executable", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn systemctl(args: &[&str]) -> Result<()> {
    tracing::debug!("systemctl {}", args.join(" "));
    let status = Command::new("systemctl")
        .args(args)
        .status()
        .context("Failed to run systemctl")?;
    if !status.success() {
        bail!("systemctl {} exited with {}", args.join(" "), status);
    }
    Ok(())
}

fn print_hint(service: &ServiceSettings, quiet: bool) {
    println_if!(quiet);
    println_if!(
        quiet,
        "Follow the copy with: {}",
        style(format!("journalctl -u {} -f", service.unit_name)).cyan()
    );
}
