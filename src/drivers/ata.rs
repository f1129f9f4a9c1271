// src/drivers/ata.rs
//! ATA/PIO block device driver: primary and secondary channels, IDENTIFY
//! probing, and sector read/write through LBA48, LBA28, or CHS addressing
//! depending on what the device actually reports.
//!
//! Entirely polled — every transfer waits on the status port's BSY/DRQ
//! bits rather than sleeping on the IRQ, since a PIO transfer's per-sector
//! cost is already dominated by the bus itself. `on_interrupt` still runs
//! per the vector table (section 6) and exists to keep the controller's
//! IRQ line acknowledged; it is not load-bearing for correctness here.

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::arch::x86::port::Port;
use crate::errors::DiskIoError;

pub const SECTOR_SIZE: usize = 512;

const STATUS_ERR: u8 = 1 << 0;
const STATUS_DRQ: u8 = 1 << 3;
const STATUS_DF: u8 = 1 << 5;
const STATUS_BSY: u8 = 1 << 7;

const CMD_IDENTIFY: u8 = 0xEC;
const CMD_IDENTIFY_PACKET: u8 = 0xA1;
const CMD_READ_SECTORS: u8 = 0x20;
const CMD_READ_SECTORS_EXT: u8 = 0x24;
const CMD_WRITE_SECTORS: u8 = 0x30;
const CMD_WRITE_SECTORS_EXT: u8 = 0x34;
const CMD_CACHE_FLUSH: u8 = 0xE7;
const CMD_CACHE_FLUSH_EXT: u8 = 0xEA;

/// Standard BIOS CHS translation geometry, assumed for the rare device old
/// enough to lack LBA support entirely (section 4.10).
const SECTORS_PER_TRACK: u64 = 63;
const HEADS_PER_CYLINDER: u64 = 16;

/// ATA vs ATAPI, distinguished during IDENTIFY by the `0x14`/`0xEB` magic
/// bytes an ATAPI device leaves on `lba_mid`/`lba_high` after the first
/// IDENTIFY fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    Ata,
    Atapi,
}

/// Base I/O ports for one ATA channel. `0x1F0`/`0x3F6` (primary) and
/// `0x170`/`0x376` (secondary) are the conventional ISA defaults this
/// driver assumes rather than discovers via PCI BARs.
struct ChannelPorts {
    data: Port<u16>,
    error: Port<u8>,
    sector_count: Port<u8>,
    lba_low: Port<u8>,
    lba_mid: Port<u8>,
    lba_high: Port<u8>,
    drive_head: Port<u8>,
    status_cmd: Port<u8>,
    control: Port<u8>,
}

impl ChannelPorts {
    const fn new(io_base: u16, ctrl_base: u16) -> Self {
        Self {
            data: Port::new(io_base),
            error: Port::new(io_base + 1),
            sector_count: Port::new(io_base + 2),
            lba_low: Port::new(io_base + 3),
            lba_mid: Port::new(io_base + 4),
            lba_high: Port::new(io_base + 5),
            drive_head: Port::new(io_base + 6),
            status_cmd: Port::new(io_base + 7),
            control: Port::new(ctrl_base),
        }
    }

    unsafe fn poll_status(&mut self, mask: u8, set: bool, spins: u32) -> Result<u8, DiskIoError> {
        unsafe {
            for _ in 0..spins {
                let status = self.status_cmd.read();
                if status & STATUS_ERR != 0 || status & STATUS_DF != 0 {
                    return Err(DiskIoError::HardwareFault);
                }
                let matches = status & mask != 0;
                if matches == set {
                    return Ok(status);
                }
            }
            Err(DiskIoError::HardwareFault)
        }
    }

    /// Waits for BSY to clear without treating ERR as fatal, since an
    /// ATAPI device sets ERR (with the `0x14`/`0xEB` signature on
    /// `lba_mid`/`lba_high`) as part of its normal IDENTIFY response.
    /// Returns the status byte so the caller can inspect ERR itself.
    unsafe fn poll_busy_clear(&mut self, spins: u32) -> Option<u8> {
        unsafe {
            for _ in 0..spins {
                let status = self.status_cmd.read();
                if status & STATUS_BSY == 0 {
                    return Some(status);
                }
            }
            None
        }
    }
}

/// Length in bytes of the IDENTIFY model-number field (40 ASCII chars,
/// byte-swapped within each of its 20 words).
const MODEL_LEN: usize = 40;

/// One probed device: whether it exists at all, its interface, addressing
/// capability, per-device sector size, total sector count, and model
/// string, all read out of its IDENTIFY (or IDENTIFY PACKET) buffer.
#[derive(Clone, Copy)]
struct DeviceInfo {
    present: bool,
    is_master: bool,
    interface: InterfaceType,
    sectors: u64,
    sector_size: u32,
    lba_supported: bool,
    lba48: bool,
    model: [u8; MODEL_LEN],
}

impl DeviceInfo {
    const fn absent(is_master: bool) -> Self {
        Self {
            present: false,
            is_master,
            interface: InterfaceType::Ata,
            sectors: 0,
            sector_size: SECTOR_SIZE as u32,
            lba_supported: false,
            lba48: false,
            model: [0; MODEL_LEN],
        }
    }

    /// The model string with its trailing IDENTIFY padding spaces trimmed.
    #[must_use]
    fn model_str(&self) -> &str {
        core::str::from_utf8(&self.model).unwrap_or("").trim_end()
    }
}

struct Channel {
    ports: ChannelPorts,
    devices: [DeviceInfo; 2],
}

impl Channel {
    const fn new(io_base: u16, ctrl_base: u16) -> Self {
        Self {
            ports: ChannelPorts::new(io_base, ctrl_base),
            devices: [DeviceInfo::absent(true), DeviceInfo::absent(false)],
        }
    }

    /// Writes the device-select register with the LBA bit set — every
    /// caller outside the CHS branch of `issue_lba_command` wants this.
    unsafe fn select(&mut self, is_master: bool, lba_top_nibble: u8) {
        unsafe { self.select_mode(is_master, true, lba_top_nibble) }
    }

    /// Writes the device-select register, choosing whether the LBA bit is
    /// set. A CHS transfer must leave it clear, or the controller reads
    /// `nibble` as LBA28's top address bits instead of the CHS head.
    unsafe fn select_mode(&mut self, is_master: bool, lba_mode: bool, nibble: u8) {
        unsafe {
            let base = 0xA0 | if is_master { 0x00 } else { 0x10 } | if lba_mode { 0x40 } else { 0x00 };
            self.ports.drive_head.write(base | (nibble & 0x0F));
        }
    }

    /// IDENTIFY probe for one of the two devices on this channel. Absence
    /// (status reads `0x00`) is not an error — most systems only populate
    /// one of the four possible devices. A polling error on the first
    /// IDENTIFY is not necessarily absence either: an ATAPI device signs
    /// itself with `0x14`/`0xEB` on `lba_mid`/`lba_high` and is retried
    /// with IDENTIFY PACKET before being given up on.
    unsafe fn probe(&mut self, is_master: bool) {
        unsafe {
            let slot = usize::from(!is_master);

            self.select(is_master, 0);
            self.ports.sector_count.write(0);
            self.ports.lba_low.write(0);
            self.ports.lba_mid.write(0);
            self.ports.lba_high.write(0);
            self.ports.status_cmd.write(CMD_IDENTIFY);

            let status = self.ports.status_cmd.read();
            if status == 0x00 {
                self.devices[slot] = DeviceInfo::absent(is_master);
                return;
            }

            let Some(status) = self.ports.poll_busy_clear(100_000) else {
                self.devices[slot] = DeviceInfo::absent(is_master);
                return;
            };

            let interface = if status & STATUS_ERR != 0 {
                let lba_mid = self.ports.lba_mid.read();
                let lba_high = self.ports.lba_high.read();
                if lba_mid != 0x14 || lba_high != 0xEB {
                    // Neither ATA nor a device we recognize as ATAPI.
                    self.devices[slot] = DeviceInfo::absent(is_master);
                    return;
                }
                self.ports.status_cmd.write(CMD_IDENTIFY_PACKET);
                if self.ports.poll_busy_clear(100_000).is_none() {
                    self.devices[slot] = DeviceInfo::absent(is_master);
                    return;
                }
                InterfaceType::Atapi
            } else {
                InterfaceType::Ata
            };

            if self.ports.poll_status(STATUS_DRQ, true, 100_000).is_err() {
                self.devices[slot] = DeviceInfo::absent(is_master);
                return;
            }

            let mut words = [0u16; 256];
            for word in &mut words {
                *word = self.ports.data.read();
            }

            let lba_supported = words[49] & (1 << 9) != 0;
            let lba48 = words[83] & (1 << 10) != 0;

            // ATAPI capacity comes from a READ CAPACITY command, not
            // IDENTIFY; this driver only masters ATA block devices, so an
            // ATAPI entry is recorded (for `dump`-style diagnostics) but
            // never sized or handed to the block-read/write path.
            let sectors = if interface == InterfaceType::Atapi {
                0
            } else if lba48 {
                u64::from(words[100])
                    | (u64::from(words[101]) << 16)
                    | (u64::from(words[102]) << 32)
                    | (u64::from(words[103]) << 48)
            } else if lba_supported {
                u64::from(words[60]) | (u64::from(words[61]) << 16)
            } else {
                0
            };

            // Word 106 bit 12: a logical sector larger than the 512-byte
            // default is reported in words 117/118 (in 16-bit words).
            let sector_size = if words[106] & (1 << 12) != 0 {
                (u32::from(words[117]) | (u32::from(words[118]) << 16)) * 2
            } else {
                SECTOR_SIZE as u32
            };

            let mut model = [0u8; MODEL_LEN];
            for (i, word) in words[27..47].iter().enumerate() {
                let [hi, lo] = word.to_be_bytes();
                model[2 * i] = hi;
                model[2 * i + 1] = lo;
            }

            self.devices[slot] = DeviceInfo {
                present: true,
                is_master,
                interface,
                sectors,
                sector_size,
                lba_supported,
                lba48,
                model,
            };
        }
    }

    fn device(&self, is_master: bool) -> Option<DeviceInfo> {
        let info = self.devices[usize::from(!is_master)];
        info.present.then_some(info)
    }
}

pub static IRQ_FIRED: [AtomicBool; 2] = [AtomicBool::new(false), AtomicBool::new(false)];

static CHANNELS: [Mutex<Channel>; 2] =
    [Mutex::new(Channel::new(0x1F0, 0x3F6)), Mutex::new(Channel::new(0x170, 0x376))];

/// Probes both devices on both channels. Called once during boot.
pub fn init() {
    for channel in &CHANNELS {
        let mut channel = channel.lock();
        unsafe {
            channel.probe(true);
            channel.probe(false);
        }
    }
}

/// Identifies one of up to four devices: channel 0/1, master/slave.
#[derive(Clone, Copy)]
pub struct DeviceId {
    pub channel: usize,
    pub is_master: bool,
}

fn resolve(id: DeviceId) -> Result<(spin::MutexGuard<'static, Channel>, DeviceInfo), DiskIoError> {
    let channel = CHANNELS.get(id.channel).ok_or(DiskIoError::NoDevice)?.lock();
    let info = channel.device(id.is_master).ok_or(DiskIoError::NoDevice)?;
    Ok((channel, info))
}

/// Validates that `(offset, size)` is sector-aligned, a whole number of
/// the device's own sector size, and within its reported capacity.
fn check_bounds(info: &DeviceInfo, offset: u64, size: usize) -> Result<(), DiskIoError> {
    if info.interface != InterfaceType::Ata {
        return Err(DiskIoError::BadDriver);
    }
    let sector_size = info.sector_size as usize;
    if offset as usize % sector_size != 0 {
        return Err(DiskIoError::BadAlignment);
    }
    if size % sector_size != 0 || size == 0 {
        return Err(DiskIoError::BadSize);
    }
    let device_bytes = info.sectors.saturating_mul(u64::from(info.sector_size));
    if offset.saturating_add(size as u64) > device_bytes {
        return Err(DiskIoError::BadSize);
    }
    Ok(())
}

/// Reads `buf.len()` bytes (a multiple of the device's sector size)
/// starting at byte `offset` into `buf`.
pub fn read(id: DeviceId, offset: u64, buf: &mut [u8]) -> DiskIoError {
    match read_inner(id, offset, buf) {
        Ok(()) => DiskIoError::Success,
        Err(e) => e,
    }
}

fn read_inner(id: DeviceId, offset: u64, buf: &mut [u8]) -> Result<(), DiskIoError> {
    let (mut channel, info) = resolve(id)?;
    check_bounds(&info, offset, buf.len())?;

    let sector_size = info.sector_size as usize;
    let start_lba = offset / info.sector_size as u64;
    let command = command_for(&info, CMD_READ_SECTORS, CMD_READ_SECTORS_EXT);

    for (i, chunk) in buf.chunks_mut(sector_size).enumerate() {
        let lba = start_lba + i as u64;
        unsafe {
            issue_lba_command(&mut channel, &info, lba, 1, command)?;
            channel.ports.poll_status(STATUS_DRQ, true, 1_000_000)?;
            for word in chunk.chunks_mut(2) {
                let value = channel.ports.data.read();
                word[0] = (value & 0xFF) as u8;
                if word.len() > 1 {
                    word[1] = (value >> 8) as u8;
                }
            }
        }
    }
    Ok(())
}

/// Writes `buf.len()` bytes (a multiple of the device's sector size) from
/// `buf` to byte `offset`, flushing the write cache once the whole
/// transfer lands.
pub fn write(id: DeviceId, offset: u64, buf: &[u8]) -> DiskIoError {
    match write_inner(id, offset, buf) {
        Ok(()) => DiskIoError::Success,
        Err(e) => e,
    }
}

fn write_inner(id: DeviceId, offset: u64, buf: &[u8]) -> Result<(), DiskIoError> {
    let (mut channel, info) = resolve(id)?;
    check_bounds(&info, offset, buf.len())?;

    let sector_size = info.sector_size as usize;
    let start_lba = offset / info.sector_size as u64;
    let command = command_for(&info, CMD_WRITE_SECTORS, CMD_WRITE_SECTORS_EXT);

    for (i, chunk) in buf.chunks(sector_size).enumerate() {
        let lba = start_lba + i as u64;
        unsafe {
            issue_lba_command(&mut channel, &info, lba, 1, command)?;
            channel.ports.poll_status(STATUS_DRQ, true, 1_000_000)?;
            for word in chunk.chunks(2) {
                let lo = word[0];
                let hi = word.get(1).copied().unwrap_or(0);
                channel.ports.data.write(u16::from(lo) | (u16::from(hi) << 8));
            }
        }
    }

    unsafe {
        channel
            .ports
            .status_cmd
            .write(if info.lba48 { CMD_CACHE_FLUSH_EXT } else { CMD_CACHE_FLUSH });
        channel.ports.poll_status(STATUS_BSY, false, 1_000_000)?;
    }
    Ok(())
}

/// Picks the LBA48 or legacy opcode for a command pair, the same
/// `info.lba48` branch `issue_lba_command` takes for addressing.
fn command_for(info: &DeviceInfo, legacy: u8, ext: u8) -> u8 {
    if info.lba48 { ext } else { legacy }
}

/// Selects the device and programs the address registers before issuing
/// `command`: LBA48 when the device reports extended addressing, LBA28
/// when it reports plain LBA support, and CHS (using the standard
/// 63-sectors/16-heads BIOS translation geometry) for a device that
/// reports neither.
unsafe fn issue_lba_command(
    channel: &mut Channel,
    info: &DeviceInfo,
    lba: u64,
    sector_count: u8,
    command: u8,
) -> Result<(), DiskIoError> {
    unsafe {
        channel.ports.poll_status(STATUS_BSY, false, 1_000_000)?;

        if info.lba48 {
            channel.select(info.is_master, 0x40);
            channel.ports.sector_count.write((sector_count >> 8) as u8);
            channel.ports.lba_low.write(((lba >> 24) & 0xFF) as u8);
            channel.ports.lba_mid.write(((lba >> 32) & 0xFF) as u8);
            channel.ports.lba_high.write(((lba >> 40) & 0xFF) as u8);
            channel.ports.sector_count.write(sector_count);
            channel.ports.lba_low.write((lba & 0xFF) as u8);
            channel.ports.lba_mid.write(((lba >> 8) & 0xFF) as u8);
            channel.ports.lba_high.write(((lba >> 16) & 0xFF) as u8);
        } else if info.lba_supported {
            let top = ((lba >> 24) & 0x0F) as u8;
            channel.select(info.is_master, 0x40 | top);
            channel.ports.sector_count.write(sector_count);
            channel.ports.lba_low.write((lba & 0xFF) as u8);
            channel.ports.lba_mid.write(((lba >> 8) & 0xFF) as u8);
            channel.ports.lba_high.write(((lba >> 16) & 0xFF) as u8);
        } else {
            let sector = (lba % SECTORS_PER_TRACK) + 1;
            let cylinder = (lba - sector + 1) / (SECTORS_PER_TRACK * HEADS_PER_CYLINDER);
            let head = ((lba - sector + 1) / SECTORS_PER_TRACK) % HEADS_PER_CYLINDER;

            channel.select_mode(info.is_master, false, head as u8);
            channel.ports.sector_count.write(sector_count);
            channel.ports.lba_low.write(sector as u8);
            channel.ports.lba_mid.write((cylinder & 0xFF) as u8);
            channel.ports.lba_high.write(((cylinder >> 8) & 0xFF) as u8);
        }

        channel.ports.status_cmd.write(command);
        Ok(())
    }
}

/// Called by the common interrupt dispatcher for vectors 46 (primary) and
/// 47 (secondary). Acknowledges the controller's own IRQ-pending state by
/// reading the status register, per the ATA spec's requirement that status
/// be read to clear the interrupt line.
pub fn on_interrupt(is_primary: bool) {
    let index = usize::from(!is_primary);
    IRQ_FIRED[index].store(true, Ordering::Release);
    if let Some(channel) = CHANNELS.get(index) {
        unsafe {
            let _ = channel.lock().ports.status_cmd.read();
        }
    }
}
