//! DOS filesystem shell - browse and edit emulated drives from the host.
//!
//! Usage:
//!   dosfs C=./cdrive                       # Mount ./cdrive as C:
//!   dosfs C=./cdrive D=./disc:cdrom        # Add a read-only CD-ROM D:
//!   dosfs A=./floppy:floppy                # Removable floppy semantics
//!   dosfs --table mounts.json              # Mounts from a JSON table
//!
//! Inside the shell: DIR, TYPE, COPY, DEL, REN, MD, RD, CD, INFO, a drive
//! letter with a colon to switch, EXIT to leave.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{debug, LevelFilter};
use serde::Deserialize;

use dosfs_core::file::OPEN_READ;
use dosfs_core::{
    date_parts, time_parts, CdromDrive, DosDrive, DriveGeometry, FileAttributes, HostPassthrough,
    LocalDrive, OpenHandleRegistry, SearchState, StaticDisc,
};

/// Browse emulated DOS drives
#[derive(Parser, Debug)]
#[command(name = "dosfs")]
#[command(about = "Interactive shell over emulated DOS drives")]
struct Args {
    /// Drive mounts as LETTER=PATH[:cdrom|:floppy]
    mounts: Vec<String>,

    /// JSON mount table (see MountTable)
    #[arg(short, long)]
    table: Option<PathBuf>,

    /// Log debug detail to stderr
    #[arg(short, long)]
    verbose: bool,
}

/// JSON mount table: `{"mounts": [{"letter": "C", "path": "./cdrive"}]}`
#[derive(Deserialize, Debug)]
struct MountTable {
    mounts: Vec<MountEntry>,
}

#[derive(Deserialize, Debug)]
struct MountEntry {
    letter: char,
    path: PathBuf,
    /// "disk" (default), "floppy" or "cdrom"
    #[serde(default)]
    kind: Option<String>,
    /// Volume label; CD-ROMs default to "CDROM"
    #[serde(default)]
    label: Option<String>,
}

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

struct Shell {
    drives: BTreeMap<char, Box<dyn DosDrive>>,
    files: OpenHandleRegistry,
    current: char,
}

fn not_mounted(letter: char) -> String {
    format!("drive {letter}: is not mounted")
}

impl Shell {
    fn new() -> Self {
        Self {
            drives: BTreeMap::new(),
            files: OpenHandleRegistry::new(),
            current: 'C',
        }
    }

    fn mount(&mut self, entry: &MountEntry) -> Result<(), Box<dyn std::error::Error>> {
        let letter = entry.letter.to_ascii_uppercase();
        let kind = entry.kind.as_deref().unwrap_or("disk");
        let policy = Arc::new(HostPassthrough);
        let drive: Box<dyn DosDrive> = match kind {
            "cdrom" => {
                let label = entry.label.as_deref().unwrap_or("CDROM");
                let disc = Arc::new(StaticDisc::new(label));
                Box::new(CdromDrive::new(letter, &entry.path, disc, policy)?)
            }
            "floppy" => Box::new(LocalDrive::new(
                letter,
                &entry.path,
                DriveGeometry::floppy(),
                policy,
            )?),
            "disk" => {
                let mut local =
                    LocalDrive::new(letter, &entry.path, DriveGeometry::fixed_disk(), policy)?;
                if let Some(label) = &entry.label {
                    local.set_label(label);
                }
                Box::new(local)
            }
            other => return Err(format!("unknown drive kind: {other}").into()),
        };
        debug!(
            "mounted {}: as {} from {}",
            letter,
            kind,
            entry.path.display()
        );
        self.drives.insert(letter, drive);
        if self.drives.len() == 1 {
            self.current = letter;
        }
        Ok(())
    }

    /// Split an optional `X:` drive prefix off a path argument.
    fn resolve<'a>(&self, arg: &'a str) -> (char, &'a str) {
        let bytes = arg.as_bytes();
        if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
            ((bytes[0] as char).to_ascii_uppercase(), &arg[2..])
        } else {
            (self.current, arg)
        }
    }

    fn cmd_dir(&mut self, arg: &str) -> Result<(), String> {
        let (letter, pattern) = self.resolve(arg);
        let pattern = if pattern.is_empty() { "*.*" } else { pattern };
        let drive = self.drives.get_mut(&letter).ok_or_else(|| not_mounted(letter))?;

        let mut search = SearchState::new(
            pattern,
            FileAttributes::ARCHIVE | FileAttributes::DIRECTORY,
        );
        let mut entry = drive.find_first(&mut search, "", false);
        let mut count = 0usize;
        while let Ok(found) = entry {
            let (year, month, day) = date_parts(found.date);
            let (hour, minute, _) = time_parts(found.time);
            let size = if found.attr.contains(FileAttributes::DIRECTORY) {
                "   <DIR>".to_string()
            } else {
                format!("{:>8}", found.size)
            };
            println!(
                "{:<12} {} {:04}-{:02}-{:02} {:02}:{:02}",
                found.name, size, year, month, day, hour, minute
            );
            count += 1;
            entry = drive.find_next(&mut search);
        }
        println!("{count} entries on {letter}:");
        Ok(())
    }

    fn cmd_type(&mut self, arg: &str) -> Result<(), String> {
        let (letter, name) = self.resolve(arg);
        let drive = self.drives.get_mut(&letter).ok_or_else(|| not_mounted(letter))?;
        let id = drive
            .file_open(&mut self.files, name, OPEN_READ)
            .map_err(|e| e.to_string())?;

        let mut buf = [0u8; 512];
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let result = loop {
            match self.files.read(id, &mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(e) = out.write_all(&buf[..n]) {
                        break Err(e.to_string());
                    }
                }
                Err(e) => break Err(e.to_string()),
            }
        };
        self.files.close(id).map_err(|e| e.to_string())?;
        result
    }

    fn cmd_copy(&mut self, from: &str, to: &str) -> Result<(), String> {
        let (from_letter, from_name) = self.resolve(from);
        let (to_letter, to_name) = self.resolve(to);

        let src = self
            .drives
            .get_mut(&from_letter)
            .ok_or_else(|| not_mounted(from_letter))?
            .file_open(&mut self.files, from_name, OPEN_READ)
            .map_err(|e| e.to_string())?;

        let dst = match self.drives.get_mut(&to_letter) {
            Some(drive) => {
                drive.file_create(&mut self.files, to_name, FileAttributes::empty())
            }
            None => {
                let _ = self.files.close(src);
                return Err(not_mounted(to_letter));
            }
        };
        let dst = match dst {
            Ok(id) => id,
            Err(e) => {
                let _ = self.files.close(src);
                return Err(e.to_string());
            }
        };

        let mut buf = [0u8; 4096];
        let result = loop {
            match self.files.read(src, &mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(e) = self.files.write(dst, &buf[..n]) {
                        break Err(e.to_string());
                    }
                }
                Err(e) => break Err(e.to_string()),
            }
        };
        let _ = self.files.close(src);
        self.files.close(dst).map_err(|e| e.to_string())?;
        result
    }

    fn cmd_info(&mut self, letter: char) -> Result<(), String> {
        let open = self.files.open_count();
        let drive = self.drives.get_mut(&letter).ok_or_else(|| not_mounted(letter))?;
        let geometry = drive.allocation_info();
        let cluster = geometry.bytes_per_sector as u64 * geometry.sectors_per_cluster as u64;
        println!("{letter}:");
        println!(
            "  {} bytes/sector, {} sectors/cluster",
            geometry.bytes_per_sector, geometry.sectors_per_cluster
        );
        println!(
            "  {} of {} clusters free ({} bytes free)",
            geometry.free_clusters,
            geometry.total_clusters,
            geometry.free_clusters as u64 * cluster
        );
        println!("  media byte {:#04x}", geometry.media_id);
        println!(
            "  remote: {}, removable: {}",
            drive.is_remote(),
            drive.is_removable()
        );
        println!("  open handles (all drives): {open}");
        Ok(())
    }

    fn dispatch(&mut self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return true;
        };
        let command = command.to_uppercase();
        let args: Vec<&str> = parts.collect();

        // Bare "D:" switches the current drive
        if command.len() == 2 && command.ends_with(':') && args.is_empty() {
            let letter = command.as_bytes()[0] as char;
            if self.drives.contains_key(&letter) {
                self.current = letter;
            } else {
                eprintln!("{}", not_mounted(letter));
            }
            return true;
        }

        let outcome: Result<(), String> = match (command.as_str(), args.as_slice()) {
            ("EXIT" | "QUIT", _) => return false,
            ("HELP", _) => {
                println!("DIR [pattern]  TYPE file  COPY from to  DEL file");
                println!("REN old new    MD dir     RD dir        CD dir");
                println!("INFO [drive]   X:         EXIT");
                Ok(())
            }
            ("DIR", []) => self.cmd_dir(""),
            ("DIR", [pattern]) => self.cmd_dir(pattern),
            ("TYPE", [name]) => self.cmd_type(name),
            ("COPY", [from, to]) => self.cmd_copy(from, to),
            ("DEL", [name]) => {
                let (letter, name) = self.resolve(name);
                match self.drives.get_mut(&letter) {
                    Some(drive) => drive
                        .file_unlink(&mut self.files, name)
                        .map_err(|e| e.to_string()),
                    None => Err(not_mounted(letter)),
                }
            }
            ("REN", [old, new]) => {
                let (letter, old) = self.resolve(old);
                let (_, new) = self.resolve(new);
                match self.drives.get_mut(&letter) {
                    Some(drive) => drive.rename(old, new).map_err(|e| e.to_string()),
                    None => Err(not_mounted(letter)),
                }
            }
            ("MD", [dir]) => {
                let (letter, dir) = self.resolve(dir);
                match self.drives.get_mut(&letter) {
                    Some(drive) => drive.make_dir(dir).map_err(|e| e.to_string()),
                    None => Err(not_mounted(letter)),
                }
            }
            ("RD", [dir]) => {
                let (letter, dir) = self.resolve(dir);
                match self.drives.get_mut(&letter) {
                    Some(drive) => drive.remove_dir(dir).map_err(|e| e.to_string()),
                    None => Err(not_mounted(letter)),
                }
            }
            ("CD", [dir]) => {
                let (letter, dir) = self.resolve(dir);
                match self.drives.get_mut(&letter) {
                    Some(drive) => {
                        if drive.test_dir(dir) {
                            drive.change_dir(dir);
                            Ok(())
                        } else {
                            Err("no such directory".to_string())
                        }
                    }
                    None => Err(not_mounted(letter)),
                }
            }
            ("INFO", []) => {
                let current = self.current;
                self.cmd_info(current)
            }
            ("INFO", [drive]) => {
                let letter = drive.trim_end_matches(':').to_uppercase();
                match letter.chars().next() {
                    Some(letter) if letter.is_ascii_alphabetic() => self.cmd_info(letter),
                    _ => Err(format!("not a drive: {drive}")),
                }
            }
            _ => Err(format!("unknown command: {command} (try HELP)")),
        };

        if let Err(message) = outcome {
            eprintln!("Error: {message}");
        }
        true
    }

    fn run(&mut self) -> std::io::Result<()> {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            print!("{}:\\> ", self.current);
            std::io::stdout().flush()?;
            line.clear();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            if !self.dispatch(line.trim()) {
                break;
            }
        }
        Ok(())
    }
}

fn parse_mount(spec: &str) -> Result<MountEntry, String> {
    let (letter, rest) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected LETTER=PATH, got: {spec}"))?;
    let mut letter_chars = letter.chars();
    let (Some(letter), None) = (letter_chars.next(), letter_chars.next()) else {
        return Err(format!("not a drive letter: {letter}"));
    };

    let (path, kind) = match rest.rsplit_once(':') {
        Some((path, kind)) if kind == "cdrom" || kind == "floppy" => {
            (path, Some(kind.to_string()))
        }
        _ => (rest, None),
    };
    Ok(MountEntry {
        letter,
        path: PathBuf::from(path),
        kind,
        label: None,
    })
}

fn main() {
    let args = Args::parse();

    let _ = log::set_logger(&LOGGER);
    log::set_max_level(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let mut entries: Vec<MountEntry> = Vec::new();
    if let Some(table_path) = &args.table {
        let table = std::fs::read_to_string(table_path)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                serde_json::from_str::<MountTable>(&text).map_err(|e| e.to_string())
            });
        match table {
            Ok(table) => entries.extend(table.mounts),
            Err(e) => {
                eprintln!("Error reading {}: {e}", table_path.display());
                std::process::exit(1);
            }
        }
    }
    for spec in &args.mounts {
        match parse_mount(spec) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
    }
    if entries.is_empty() {
        eprintln!("No drives mounted; pass LETTER=PATH or --table (see --help)");
        std::process::exit(1);
    }

    let mut shell = Shell::new();
    for entry in &entries {
        if let Err(e) = shell.mount(entry) {
            eprintln!("Error mounting {}: {e}", entry.letter);
            std::process::exit(1);
        }
    }

    if let Err(e) = shell.run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mount_specs() {
        let entry = parse_mount("C=./cdrive").unwrap();
        assert_eq!(entry.letter, 'C');
        assert_eq!(entry.path, PathBuf::from("./cdrive"));
        assert!(entry.kind.is_none());

        let entry = parse_mount("D=/images/disc:cdrom").unwrap();
        assert_eq!(entry.kind.as_deref(), Some("cdrom"));
        assert_eq!(entry.path, PathBuf::from("/images/disc"));

        assert!(parse_mount("nope").is_err());
        assert!(parse_mount("CD=x").is_err());
    }

    #[test]
    fn test_mount_table_json() {
        let table: MountTable = serde_json::from_str(
            r#"{"mounts": [
                {"letter": "C", "path": "/srv/c"},
                {"letter": "D", "path": "/srv/d", "kind": "cdrom", "label": "GAME_CD"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(table.mounts.len(), 2);
        assert_eq!(table.mounts[1].label.as_deref(), Some("GAME_CD"));
    }

    #[test]
    fn test_resolve_drive_prefix() {
        let shell = Shell::new();
        assert_eq!(shell.resolve("D:FOO.TXT"), ('D', "FOO.TXT"));
        assert_eq!(shell.resolve("d:sub\\foo.txt"), ('D', "sub\\foo.txt"));
        assert_eq!(shell.resolve("FOO.TXT"), ('C', "FOO.TXT"));
    }

    #[test]
    fn test_shell_copy_between_drives() {
        let dir_c = tempfile::tempdir().unwrap();
        let dir_d = tempfile::tempdir().unwrap();
        std::fs::write(dir_c.path().join("SRC.TXT"), b"payload").unwrap();

        let mut shell = Shell::new();
        shell
            .mount(&MountEntry {
                letter: 'C',
                path: dir_c.path().to_path_buf(),
                kind: None,
                label: None,
            })
            .unwrap();
        shell
            .mount(&MountEntry {
                letter: 'D',
                path: dir_d.path().to_path_buf(),
                kind: None,
                label: None,
            })
            .unwrap();

        shell.cmd_copy("SRC.TXT", "D:DST.TXT").unwrap();
        assert_eq!(
            std::fs::read(dir_d.path().join("DST.TXT")).unwrap(),
            b"payload"
        );
        assert_eq!(shell.files.open_count(), 0);
    }
}
