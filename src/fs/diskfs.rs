// src/fs/diskfs.rs
//! Flat, single-directory filesystem over a raw ATA device: one superblock
//! sector, a fixed directory table, then file data in fixed-size
//! reservations. On-disk layout is this crate's own invention — the
//! design only calls for *a* VFS collaborator bound to the block driver,
//! not any particular format or directory hierarchy.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::drivers::ata::{self, DeviceId};
use crate::errors::{DiskIoError, FsError};
use crate::fs::vfs::FileSystem;
use crate::fs::FileDescriptor;
use crate::syscall::{OPEN_TRUNC, OPEN_WRONLY};

const SECTOR_SIZE: usize = 512;
const MAGIC: [u8; 4] = *b"PKFS";
const NAME_LEN: usize = 48;
const ENTRY_SIZE: usize = 64;
const ENTRIES_PER_SECTOR: u64 = (SECTOR_SIZE / ENTRY_SIZE) as u64;
const MAX_ENTRIES: u64 = 64;
const DIRECTORY_SECTORS: u64 = MAX_ENTRIES.div_ceil(ENTRIES_PER_SECTOR);
const DATA_START_SECTOR: u64 = 1 + DIRECTORY_SECTORS;
/// Every created file reserves this much space up front; `write` past it
/// fails rather than relocating the file.
const FILE_RESERVATION_SECTORS: u64 = 64;

fn disk_err(e: DiskIoError) -> FsError {
    match e {
        DiskIoError::NoDevice => FsError::NotFound,
        _ => FsError::InvalidInput,
    }
}

fn read_sector(device: DeviceId, sector: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FsError> {
    ata::read(device, sector * SECTOR_SIZE as u64, buf).into_result().map_err(disk_err)
}

fn write_sector(device: DeviceId, sector: u64, buf: &[u8; SECTOR_SIZE]) -> Result<(), FsError> {
    ata::write(device, sector * SECTOR_SIZE as u64, buf).into_result().map_err(disk_err)
}

#[derive(Clone)]
struct Entry {
    name: String,
    slot: u64,
    start_sector: u64,
    reserved_sectors: u64,
    len: u64,
}

impl Entry {
    fn encode(&self, out: &mut [u8]) {
        out.fill(0);
        let name_bytes = self.name.as_bytes();
        let n = name_bytes.len().min(NAME_LEN);
        out[..n].copy_from_slice(&name_bytes[..n]);
        out[NAME_LEN..NAME_LEN + 4].copy_from_slice(&(self.start_sector as u32).to_le_bytes());
        out[NAME_LEN + 4..NAME_LEN + 8].copy_from_slice(&(self.reserved_sectors as u32).to_le_bytes());
        out[NAME_LEN + 8..NAME_LEN + 12].copy_from_slice(&(self.len as u32).to_le_bytes());
    }

    fn decode(slot: u64, raw: &[u8]) -> Option<Entry> {
        if raw[0] == 0 {
            return None;
        }
        let name_len = raw[..NAME_LEN].iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = String::from_utf8_lossy(&raw[..name_len]).to_string();
        let start_sector = u32::from_le_bytes(raw[NAME_LEN..NAME_LEN + 4].try_into().unwrap()) as u64;
        let reserved_sectors = u32::from_le_bytes(raw[NAME_LEN + 4..NAME_LEN + 8].try_into().unwrap()) as u64;
        let len = u32::from_le_bytes(raw[NAME_LEN + 8..NAME_LEN + 12].try_into().unwrap()) as u64;
        Some(Entry { name, slot, start_sector, reserved_sectors, len })
    }
}

struct Directory {
    device: DeviceId,
    entries: Vec<Entry>,
    next_free_sector: u64,
}

impl Directory {
    fn mount(device: DeviceId) -> Self {
        let mut header = [0u8; SECTOR_SIZE];
        if read_sector(device, 0, &mut header).is_err() || header[0..4] != MAGIC {
            return Self { device, entries: Vec::new(), next_free_sector: DATA_START_SECTOR };
        }

        let mut entries = Vec::new();
        let mut next_free_sector = DATA_START_SECTOR;
        let mut buf = [0u8; SECTOR_SIZE];
        for dir_sector in 0..DIRECTORY_SECTORS {
            if read_sector(device, 1 + dir_sector, &mut buf).is_err() {
                continue;
            }
            for (i, raw) in buf.chunks_exact(ENTRY_SIZE).enumerate() {
                let slot = dir_sector * ENTRIES_PER_SECTOR + i as u64;
                if let Some(entry) = Entry::decode(slot, raw) {
                    next_free_sector = next_free_sector.max(entry.start_sector + entry.reserved_sectors);
                    entries.push(entry);
                }
            }
        }
        Self { device, entries, next_free_sector }
    }

    fn find(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    fn lowest_free_slot(&self) -> Option<u64> {
        (0..MAX_ENTRIES).find(|slot| !self.entries.iter().any(|e| e.slot == *slot))
    }

    fn persist_slot(&self, entry: &Entry) -> Result<(), FsError> {
        let dir_sector = entry.slot / ENTRIES_PER_SECTOR;
        let offset_in_sector = ((entry.slot % ENTRIES_PER_SECTOR) * ENTRY_SIZE as u64) as usize;
        let mut buf = [0u8; SECTOR_SIZE];
        let _ = read_sector(self.device, 1 + dir_sector, &mut buf);
        entry.encode(&mut buf[offset_in_sector..offset_in_sector + ENTRY_SIZE]);
        write_sector(self.device, 1 + dir_sector, &buf)?;

        if self.entries.is_empty() || self.entries.len() == 1 {
            let mut header = [0u8; SECTOR_SIZE];
            header[0..4].copy_from_slice(&MAGIC);
            write_sector(self.device, 0, &header)?;
        }
        Ok(())
    }

    fn create(&mut self, name: &str) -> Result<Entry, FsError> {
        if self.find(name).is_some() {
            return Err(FsError::InvalidInput);
        }
        let slot = self.lowest_free_slot().ok_or(FsError::TableFull)?;
        let entry = Entry {
            name: name.to_string(),
            slot,
            start_sector: self.next_free_sector,
            reserved_sectors: FILE_RESERVATION_SECTORS,
            len: 0,
        };
        self.persist_slot(&entry)?;
        self.next_free_sector += FILE_RESERVATION_SECTORS;
        self.entries.push(entry.clone());
        Ok(entry)
    }

    fn remove(&mut self, name: &str) -> Result<(), FsError> {
        let idx = self.entries.iter().position(|e| e.name == name).ok_or(FsError::NotFound)?;
        let mut tombstone = self.entries[idx].clone();
        tombstone.name.clear();
        let dir_sector = tombstone.slot / ENTRIES_PER_SECTOR;
        let offset_in_sector = ((tombstone.slot % ENTRIES_PER_SECTOR) * ENTRY_SIZE as u64) as usize;
        let mut buf = [0u8; SECTOR_SIZE];
        let _ = read_sector(self.device, 1 + dir_sector, &mut buf);
        buf[offset_in_sector..offset_in_sector + ENTRY_SIZE].fill(0);
        write_sector(self.device, 1 + dir_sector, &buf)?;
        self.entries.remove(idx);
        Ok(())
    }

    fn update_len(&mut self, slot: u64, len: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.slot == slot) {
            entry.len = len;
            let snapshot = entry.clone();
            let _ = self.persist_slot(&snapshot);
        }
    }
}

pub struct DiskFs {
    directory: Arc<Mutex<Directory>>,
}

impl DiskFs {
    /// Reads the superblock and directory table from `device`. An absent
    /// or corrupt superblock is treated as a freshly-formatted empty
    /// volume rather than a mount failure.
    #[must_use]
    pub fn mount(device: DeviceId) -> Self {
        Self { directory: Arc::new(Mutex::new(Directory::mount(device))) }
    }
}

impl FileSystem for DiskFs {
    fn open(
        &mut self,
        path: &str,
        flags: u32,
        _mode: u32,
    ) -> Result<Arc<Mutex<dyn FileDescriptor + Send>>, FsError> {
        let name = path.trim_start_matches('/');
        let mut directory = self.directory.lock();
        let writable = flags & OPEN_WRONLY != 0;

        let entry = match directory.find(name) {
            Some(e) => e.clone(),
            None if flags & OPEN_TRUNC != 0 => directory.create(name)?,
            None => return Err(FsError::NotFound),
        };
        let device = directory.device;
        drop(directory);

        Ok(Arc::new(Mutex::new(DiskFile {
            directory: self.directory.clone(),
            device,
            slot: entry.slot,
            start_sector: entry.start_sector,
            reserved_sectors: entry.reserved_sectors,
            len: entry.len,
            position: 0,
            writable,
        })))
    }

    fn unlink(&mut self, path: &str) -> Result<(), FsError> {
        let name = path.trim_start_matches('/');
        self.directory.lock().remove(name)
    }
}

struct DiskFile {
    directory: Arc<Mutex<Directory>>,
    device: DeviceId,
    slot: u64,
    start_sector: u64,
    reserved_sectors: u64,
    len: u64,
    position: u64,
    writable: bool,
}

impl DiskFile {
    fn capacity(&self) -> u64 {
        self.reserved_sectors * SECTOR_SIZE as u64
    }
}

impl FileDescriptor for DiskFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let remaining = self.len.saturating_sub(self.position);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        let mut sector_buf = [0u8; SECTOR_SIZE];
        let mut done = 0;
        while done < n {
            let abs = self.position + done as u64;
            let sector = self.start_sector + abs / SECTOR_SIZE as u64;
            read_sector(self.device, sector, &mut sector_buf)?;
            let in_sector = (abs % SECTOR_SIZE as u64) as usize;
            let take = (SECTOR_SIZE - in_sector).min(n - done);
            buf[done..done + take].copy_from_slice(&sector_buf[in_sector..in_sector + take]);
            done += take;
        }
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        if !self.writable {
            return Err(FsError::InvalidInput);
        }
        if self.position + buf.len() as u64 > self.capacity() {
            return Err(FsError::InvalidInput);
        }
        let mut sector_buf = [0u8; SECTOR_SIZE];
        let mut done = 0;
        while done < buf.len() {
            let abs = self.position + done as u64;
            let sector = self.start_sector + abs / SECTOR_SIZE as u64;
            let in_sector = (abs % SECTOR_SIZE as u64) as usize;
            let take = (SECTOR_SIZE - in_sector).min(buf.len() - done);
            if take < SECTOR_SIZE {
                read_sector(self.device, sector, &mut sector_buf)?;
            }
            sector_buf[in_sector..in_sector + take].copy_from_slice(&buf[done..done + take]);
            write_sector(self.device, sector, &sector_buf)?;
            done += take;
        }
        self.position += buf.len() as u64;
        self.len = self.len.max(self.position);
        self.directory.lock().update_len(self.slot, self.len);
        Ok(buf.len())
    }

    fn close(&mut self) {}

    fn poll(&mut self, events: u8) -> u8 {
        events & crate::fs::POLL_REQUESTABLE_MASK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: DeviceId = DeviceId { channel: 0, is_master: true };

    fn entry(name: &str, slot: u64) -> Entry {
        Entry { name: name.to_string(), slot, start_sector: DATA_START_SECTOR, reserved_sectors: 64, len: 0 }
    }

    #[test_case]
    fn find_matches_by_name_only() {
        let directory = Directory { device: DEVICE, entries: alloc::vec![entry("bin/shell", 0)], next_free_sector: 0 };
        assert!(directory.find("bin/shell").is_some());
        assert!(directory.find("bin/init").is_none());
    }

    #[test_case]
    fn lowest_free_slot_fills_gaps_before_growing() {
        let directory =
            Directory { device: DEVICE, entries: alloc::vec![entry("a", 0), entry("b", 2)], next_free_sector: 0 };
        assert_eq!(directory.lowest_free_slot(), Some(1));
    }

    #[test_case]
    fn lowest_free_slot_is_none_once_every_slot_is_used() {
        let entries: Vec<Entry> = (0..MAX_ENTRIES).map(|slot| entry("x", slot)).collect();
        let directory = Directory { device: DEVICE, entries, next_free_sector: 0 };
        assert_eq!(directory.lowest_free_slot(), None);
    }
}
