use anyhow::{bail, Context, Result};
use chrono::Local;
use ioscmd_core::{run_session, DeviceEvent, DeviceRecord, RelayService, Terminal, Usbmux};
use log::{info, warn};
use std::fs;
use std::io::{self, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

use crate::cli::{Commands, GlobalArgs};
use crate::config::Settings;
use crate::remote::{FileChannel, RemoteSession};

const INSTALL_PATH: &str = "/tmp/_ios_install.deb";

/// Everything a subcommand needs to reach the device.
pub struct Target {
    pub settings: Settings,
    pub udid: Option<String>,
    pub ip: Option<String>,
}

impl Target {
    pub fn new(global: &GlobalArgs, settings: Settings) -> Self {
        Self { settings, udid: global.udid.clone(), ip: global.ip.clone() }
    }

    pub fn mux(&self) -> Usbmux {
        Usbmux::new(self.settings.endpoint.clone())
    }

    pub fn relay_service(&self) -> RelayService {
        RelayService::new(self.mux(), self.udid.clone(), self.settings.port)
    }

    /// Log in over a direct TCP connection when `--ip` is given, otherwise
    /// through a device tunnel.
    pub fn remote(&self) -> Result<RemoteSession> {
        let username = &self.settings.username;
        let password = &self.settings.password;

        let session = match &self.ip {
            Some(ip) => {
                let stream = TcpStream::connect((ip.as_str(), self.settings.port))
                    .with_context(|| format!("Failed to connect to {ip}:{}", self.settings.port))?;
                RemoteSession::connect(stream, username, password)?
            }
            None => {
                let tunnel = self.relay_service().open_tunnel()?;
                RemoteSession::connect(tunnel, username, password)?
            }
        };
        Ok(session)
    }
}

/// Exit code for the process.
pub fn run(command: Commands, target: &Target) -> Result<i32> {
    match command {
        Commands::Devices { json } => devices(target, json).map(|_| 0),
        Commands::Buid => {
            println!("{}", target.mux().read_buid()?);
            Ok(0)
        }
        Commands::Watch => watch(target).map(|_| 0),
        Commands::Relay { local_port } => relay(target, local_port).map(|_| 0),
        Commands::Ssh => ssh(target).map(|_| 0),
        Commands::Shell { cmd } => shell(target, &cmd.join(" ")),
        Commands::Push { local, remote } => push(target, &local, &remote).map(|_| 0),
        Commands::Pull { remote, local } => pull(target, &remote, &local).map(|_| 0),
        Commands::Install { deb } => install(target, &deb),
    }
}

fn devices(target: &Target, json: bool) -> Result<()> {
    let devices = target.mux().list_devices()?;
    let mut out = io::stdout().lock();
    if json {
        writeln!(out, "{}", render_json(&devices)?)?;
    } else {
        write!(out, "{}", render_table(&devices))?;
    }
    Ok(())
}

pub fn render_json(devices: &[DeviceRecord]) -> Result<String> {
    serde_json::to_string_pretty(devices).context("Failed to serialize device list")
}

pub fn render_table(devices: &[DeviceRecord]) -> String {
    let headers = ["Identifier", "DeviceID", "ConnectionType", "ProductID", "SerialNumber"];
    let rows: Vec<[String; 5]> = devices
        .iter()
        .map(|d| {
            [
                d.udid.clone(),
                d.device_id.to_string(),
                d.connection_type.to_string(),
                d.product_id.map(|id| id.to_string()).unwrap_or_default(),
                d.serial_number.clone().unwrap_or_default(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: &[&str]| {
        let padded: Vec<String> =
            cells.iter().zip(widths).map(|(cell, width)| format!("{cell:<width$}")).collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let mut table = line(&headers);
    for row in &rows {
        table.push_str(&line(&row.each_ref().map(String::as_str)));
    }
    table
}

pub fn describe_event(event: &DeviceEvent) -> String {
    match event {
        DeviceEvent::Attached { device_id, properties: Some(device) } => {
            format!("Attached  {device_id}  {} ({})", device.udid, device.connection_type)
        }
        other => format!("{:<8}  {}", other.kind(), other.device_id()),
    }
}

fn watch(target: &Target) -> Result<()> {
    let watcher = target.mux().watch_devices()?;

    let handle = watcher.close_handle();
    ctrlc::set_handler(move || {
        handle.close();
    })
    .context("Failed to install Ctrl-C handler")?;

    let mut out = io::stdout().lock();
    for event in watcher {
        let event = event?;
        writeln!(out, "{}  {}", Local::now().format("%Y-%m-%d %H:%M:%S"), describe_event(&event))?;
        out.flush()?;
    }
    Ok(())
}

fn relay(target: &Target, local_port: u16) -> Result<()> {
    let service = target.relay_service();
    let listener = service.bind(("127.0.0.1", local_port))?;
    let addr = listener.local_addr()?;
    println!("Relaying {addr} to device port {}", service.port());
    io::stdout().flush()?;

    loop {
        if let Err(e) = listener.serve_one() {
            warn!("Relay session failed: {e:#}");
        }
    }
}

fn ssh(target: &Target) -> Result<()> {
    let remote = target.remote()?;
    let mut terminal = Terminal::new(io::stdin());
    let size = terminal.size()?;

    let mut shell = remote.open_shell(size)?;
    let result = run_session(&mut shell, &mut terminal, &mut io::stdout());
    let _ = shell.close();
    info!("Shell session closed");
    result
}

fn shell(target: &Target, command: &str) -> Result<i32> {
    let remote = target.remote()?;
    Ok(remote.exec(command, &mut io::stdout().lock())?)
}

fn push(target: &Target, local: &Path, remote: &Path) -> Result<()> {
    if !local.exists() {
        bail!("{} does not exist", local.display());
    }
    let files = target.remote()?.open_files()?;
    upload(&files, local, remote)
}

/// Upload `local`, descending into directories. Existing remote directories
/// are reused.
pub fn upload(files: &FileChannel, local: &Path, remote: &Path) -> Result<()> {
    if local.is_dir() {
        if let Err(e) = files.mkdir(remote) {
            info!("mkdir {} failed, assuming it exists: {e}", remote.display());
        }
        let mut entries = fs::read_dir(local)
            .with_context(|| format!("Failed to read {}", local.display()))?
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            upload(files, &entry.path(), &remote.join(entry.file_name()))?;
        }
    } else {
        println!("upload file {} to {}", local.display(), remote.display());
        files
            .put(local, remote)
            .with_context(|| format!("Failed to upload {}", local.display()))?;
    }
    Ok(())
}

/// Where a pulled file lands: into `local` itself, or under it when it is a
/// directory.
pub fn pull_target(remote: &Path, local: &Path) -> PathBuf {
    match remote.file_name() {
        Some(name) if local.is_dir() => local.join(name),
        _ => local.to_path_buf(),
    }
}

fn pull(target: &Target, remote: &Path, local: &Path) -> Result<()> {
    let destination = pull_target(remote, local);
    let files = target.remote()?.open_files()?;
    files
        .get(remote, &destination)
        .with_context(|| format!("Failed to download {}", remote.display()))?;
    println!("{} has been downloaded to {}", remote.display(), destination.display());
    Ok(())
}

fn install(target: &Target, deb: &Path) -> Result<i32> {
    if !deb.is_file() {
        bail!("{} is not a file", deb.display());
    }

    let remote = target.remote()?;
    remote
        .open_files()?
        .put(deb, Path::new(INSTALL_PATH))
        .with_context(|| format!("Failed to upload {}", deb.display()))?;

    let mut out = io::stdout().lock();
    let status = remote.exec(&format!("dpkg -i {INSTALL_PATH}"), &mut out)?;
    if status != 0 {
        warn!("dpkg exited with status {status}");
    }
    Ok(remote.exec("apt-get -f -y install", &mut out)?)
}
