//! Linux generic SCSI (`/dev/sgN`) passthrough using the `SG_IO` ioctl.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use sem_core::Direction;

use super::{Passthrough, PassthroughError, PassthroughReply, PassthroughRequest, SENSE_BUFFER_LEN};

const SG_IO: u32 = 0x2285;
const SG_DXFER_NONE: libc::c_int = -1;
const SG_DXFER_TO_DEV: libc::c_int = -2;
const SG_DXFER_FROM_DEV: libc::c_int = -3;

const DISCOVERY_SLOTS: u32 = 32;
const DISCOVERY_INQUIRY_LEN: usize = 96;
const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(2000);

/// `struct sg_io_hdr` from `<scsi/sg.h>`.
#[repr(C)]
struct SgIoHdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: libc::c_uchar,
    mx_sb_len: libc::c_uchar,
    iovec_count: libc::c_ushort,
    dxfer_len: libc::c_uint,
    dxferp: *mut libc::c_void,
    cmdp: *mut libc::c_uchar,
    sbp: *mut libc::c_uchar,
    timeout: libc::c_uint,
    flags: libc::c_uint,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: libc::c_uchar,
    masked_status: libc::c_uchar,
    msg_status: libc::c_uchar,
    sb_len_wr: libc::c_uchar,
    host_status: libc::c_ushort,
    driver_status: libc::c_ushort,
    resid: libc::c_int,
    duration: libc::c_uint,
    info: libc::c_uint,
}

/// An open generic SCSI device node.
#[derive(Debug)]
pub struct SgDevice {
    file: File,
    path: PathBuf,
}

impl SgDevice {
    pub fn open(path: &Path) -> Result<Self, PassthroughError> {
        Self::open_with_flags(path, 0)
    }

    fn open_with_flags(path: &Path, flags: libc::c_int) -> Result<Self, PassthroughError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(flags)
            .open(path)
            .map_err(|source| PassthroughError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        info!("opened SCSI device {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Passthrough for SgDevice {
    fn submit(&mut self, request: &PassthroughRequest) -> Result<PassthroughReply, PassthroughError> {
        let cmd_len = u8::try_from(request.cdb.len())
            .map_err(|_| PassthroughError::CdbTooLong(request.cdb.len()))?;

        let mut cdb = request.cdb.clone();
        let mut sense = vec![0u8; SENSE_BUFFER_LEN];
        let (direction, mut buffer) = match request.direction {
            Direction::None => (SG_DXFER_NONE, Vec::new()),
            Direction::HostToDevice => (SG_DXFER_TO_DEV, request.outbound.clone()),
            Direction::DeviceToHost => (SG_DXFER_FROM_DEV, vec![0u8; request.inbound_len]),
        };
        let dxfer_len = u32::try_from(buffer.len()).map_err(|_| PassthroughError::TransferTooLarge {
            len: buffer.len(),
            max: u32::MAX as usize,
        })?;

        let mut hdr = SgIoHdr {
            interface_id: libc::c_int::from(b'S'),
            dxfer_direction: direction,
            cmd_len,
            mx_sb_len: SENSE_BUFFER_LEN as libc::c_uchar,
            iovec_count: 0,
            dxfer_len,
            dxferp: if buffer.is_empty() {
                std::ptr::null_mut()
            } else {
                buffer.as_mut_ptr().cast()
            },
            cmdp: cdb.as_mut_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: u32::try_from(request.timeout.as_millis()).unwrap_or(u32::MAX),
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // SAFETY: every pointer in `hdr` refers to a live buffer owned by this
        // frame whose length matches the corresponding length field, and the
        // ioctl completes synchronously before any buffer is dropped.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO as _, &mut hdr as *mut SgIoHdr) };
        if rc < 0 {
            return Err(PassthroughError::Ioctl(std::io::Error::last_os_error()));
        }

        if request.direction == Direction::DeviceToHost {
            let transferred = buffer.len().saturating_sub(hdr.resid.max(0) as usize);
            buffer.truncate(transferred);
        } else {
            buffer.clear();
        }
        sense.truncate(usize::from(hdr.sb_len_wr).min(SENSE_BUFFER_LEN));

        debug!(
            "{}: status=0x{:02X} host=0x{:04X} driver=0x{:04X} resid={} in {}ms",
            self.path.display(),
            hdr.status,
            hdr.host_status,
            hdr.driver_status,
            hdr.resid,
            hdr.duration
        );

        Ok(PassthroughReply {
            data: buffer,
            device_status: hdr.status,
            host_status: hdr.host_status,
            driver_status: hdr.driver_status,
            sense,
        })
    }
}

/// Scans `/dev/sg0`..`/dev/sg31` with INQUIRY and returns the first device
/// identifying as a JEOL or SEM unit.
pub fn discover() -> Option<PathBuf> {
    let inquiry = PassthroughRequest {
        cdb: vec![0x12, 0x00, 0x00, 0x00, DISCOVERY_INQUIRY_LEN as u8, 0x00],
        direction: Direction::DeviceToHost,
        outbound: Vec::new(),
        inbound_len: DISCOVERY_INQUIRY_LEN,
        timeout: DISCOVERY_TIMEOUT,
    };

    for slot in 0..DISCOVERY_SLOTS {
        let path = PathBuf::from(format!("/dev/sg{slot}"));
        if !path.exists() {
            continue;
        }
        let Ok(mut device) = SgDevice::open_with_flags(&path, libc::O_NONBLOCK) else {
            continue;
        };
        match device.submit(&inquiry) {
            Ok(reply) if reply.is_good() => {
                let (vendor, product) = identity(&reply.data);
                info!("checked {}: vendor={vendor:?} product={product:?}", path.display());
                if is_sem(&vendor, &product) {
                    info!("found SEM device at {}", path.display());
                    return Some(path);
                }
            }
            Ok(reply) => debug!("{}: INQUIRY rejected ({})", path.display(), reply.status_detail()),
            Err(e) => debug!("{}: INQUIRY failed: {e}", path.display()),
        }
    }
    None
}

/// Vendor (bytes 8..16) and product (16..32) of standard INQUIRY data.
fn identity(data: &[u8]) -> (String, String) {
    let field = |range: std::ops::Range<usize>| {
        data.get(range)
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .unwrap_or_default()
    };
    (field(8..16), field(16..32))
}

fn is_sem(vendor: &str, product: &str) -> bool {
    vendor.contains("JEOL") || vendor.contains("SEM") || product.contains("SEM")
}
