//! Minimal userspace binder client.
//!
//! Just enough of the binder protocol to look up a HAL service at the
//! service manager (context manager, handle 0) and issue synchronous
//! transactions against it: one outgoing `BC_TRANSACTION`, then a read
//! loop until `BR_REPLY`. Both the AIDL flavour (`/dev/binder`) and
//! the HIDL flavour (`/dev/hwbinder`) are supported; they differ in
//! the interface-token header and the service manager contract.

use std::fs::{File, OpenOptions};
use std::mem;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};

const BINDER_VM_SIZE: usize = 1024 * 1024 - 4096 * 2;

// _IOC encodings for the binder ioctls and protocol codes
const IOC_NONE: u32 = 0;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << 30) | ((size as u32) << 16) | ((ty as u32) << 8) | (nr as u32)
}

const fn iow(ty: u8, nr: u8, size: usize) -> u32 {
    ioc(IOC_WRITE, ty, nr, size)
}

const fn ior(ty: u8, nr: u8, size: usize) -> u32 {
    ioc(IOC_READ, ty, nr, size)
}

const fn iowr(ty: u8, nr: u8, size: usize) -> u32 {
    ioc(IOC_READ | IOC_WRITE, ty, nr, size)
}

const fn io(ty: u8, nr: u8) -> u32 {
    ioc(IOC_NONE, ty, nr, 0)
}

#[repr(C)]
struct BinderWriteRead {
    write_size: libc::c_ulong,
    write_consumed: libc::c_ulong,
    write_buffer: libc::c_ulong,
    read_size: libc::c_ulong,
    read_consumed: libc::c_ulong,
    read_buffer: libc::c_ulong,
}

#[repr(C)]
#[derive(Copy, Clone)]
struct BinderTransactionData {
    /// Target handle for commands, pointer pair for replies.
    target: usize,
    cookie: usize,
    code: u32,
    flags: u32,
    sender_pid: libc::pid_t,
    sender_euid: libc::uid_t,
    data_size: usize,
    offsets_size: usize,
    data_buffer: usize,
    data_offsets: usize,
}

// B_PACK_CHARS(c1, c2, c3, B_TYPE_LARGE)
const fn pack_chars(c1: u8, c2: u8, c3: u8, c4: u8) -> u32 {
    ((c1 as u32) << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | (c4 as u32)
}

const BINDER_TYPE_HANDLE: u32 = pack_chars(b's', b'h', b'*', 0x85);

const BINDER_WRITE_READ: u32 = iowr(b'b', 1, mem::size_of::<BinderWriteRead>());
const BINDER_SET_MAX_THREADS: u32 = iow(b'b', 5, mem::size_of::<u32>());
const BINDER_VERSION: u32 = iowr(b'b', 9, mem::size_of::<i32>());
const BINDER_CURRENT_PROTOCOL_VERSION: i32 = 8;

const BC_TRANSACTION: u32 = iow(b'c', 0, mem::size_of::<BinderTransactionData>());
const BC_FREE_BUFFER: u32 = iow(b'c', 3, mem::size_of::<usize>());

const BR_ERROR: u32 = ior(b'r', 0, mem::size_of::<i32>());
const BR_TRANSACTION_COMPLETE: u32 = io(b'r', 6);
const BR_REPLY: u32 = ior(b'r', 3, mem::size_of::<BinderTransactionData>());
const BR_DEAD_REPLY: u32 = io(b'r', 5);
const BR_FAILED_REPLY: u32 = io(b'r', 17);
const BR_NOOP: u32 = io(b'r', 12);
const BR_SPURIOUS_WAKEUP: u32 = io(b'r', 11);

/// Which binder dialect a device speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// `/dev/binder`, AIDL services, `SYST` interface header.
    Aidl,
    /// `/dev/hwbinder`, HIDL services, C-string interface header.
    Hidl,
}

/// Serialized transaction payload.
#[derive(Default)]
pub struct Parcel {
    data: Vec<u8>,
}

// AIDL interface token header (Parcel::writeInterfaceToken)
const STRICT_MODE_PENALTY_GATHER: i32 = 1 << 31;
const UNSET_WORK_SOURCE: i32 = -1;
const INTERFACE_HEADER: u32 = pack_chars(b'S', b'Y', b'S', b'T');

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    fn pad(&mut self) {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_ne_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_ne_bytes());
    }

    /// UTF-16 string, length-prefixed and NUL-terminated as the
    /// framework Parcel does.
    pub fn write_string16(&mut self, s: &str) {
        let units: Vec<u16> = s.encode_utf16().collect();
        self.write_i32(units.len() as i32);
        for unit in &units {
            self.data.extend_from_slice(&unit.to_ne_bytes());
        }
        self.data.extend_from_slice(&0u16.to_ne_bytes());
        self.pad();
    }

    /// NUL-terminated UTF-8 string (hwbinder interface tokens).
    pub fn write_cstring(&mut self, s: &str) {
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        self.pad();
    }

    /// Raw struct payload (AIDL non-null parcelable: marker, then the
    /// parcelable size including the size field itself).
    pub fn write_parcelable(&mut self, bytes: &[u8]) {
        self.write_i32(1); // non-null
        self.write_i32(bytes.len() as i32 + 4);
        self.data.extend_from_slice(bytes);
        self.pad();
    }

    /// Null strong binder: a zeroed binder-typed flat object. Null
    /// objects carry no offset entry.
    pub fn write_null_binder(&mut self) {
        const BINDER_TYPE_BINDER: u32 = pack_chars(b's', b'b', b'*', 0x85);
        self.write_u32(BINDER_TYPE_BINDER);
        self.write_u32(0); // flags
        self.data
            .extend_from_slice(&0usize.to_ne_bytes()); // binder
        self.data
            .extend_from_slice(&0usize.to_ne_bytes()); // cookie
    }

    pub fn write_interface_token(&mut self, flavor: Flavor, iface: &str) {
        match flavor {
            Flavor::Aidl => {
                self.write_i32(STRICT_MODE_PENALTY_GATHER);
                self.write_i32(UNSET_WORK_SOURCE);
                self.write_u32(INTERFACE_HEADER);
                self.write_string16(iface);
            }
            Flavor::Hidl => self.write_cstring(iface),
        }
    }

    fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// Cursor over a reply buffer.
pub struct ReplyParcel {
    data: Vec<u8>,
    pos: usize,
}

impl ReplyParcel {
    fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        if self.pos + 4 > self.data.len() {
            return Err(Error::DeviceIo("Short binder reply".to_string()));
        }
        let bytes: [u8; 4] = self.data[self.pos..self.pos + 4].try_into().unwrap();
        self.pos += 4;
        Ok(i32::from_ne_bytes(bytes))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_i32()? as u32)
    }

    /// First i32 of a reply: 0 is OK, anything else is an exception
    /// or HAL status.
    pub fn read_status(&mut self) -> Result<()> {
        let status = self.read_i32()?;
        if status != 0 {
            return Err(Error::DeviceIo(format!("HAL returned status {status}")));
        }
        Ok(())
    }

    /// Scan the remaining words for a handle-typed object and return
    /// its handle. Used to extract the service binder from service
    /// manager replies.
    pub fn find_handle(&self) -> Option<u32> {
        let words: Vec<u32> = self.data[self.pos..]
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        for (i, word) in words.iter().enumerate() {
            if *word == BINDER_TYPE_HANDLE {
                // flat_binder_object: type, flags, handle, cookie
                if let Some(handle) = words.get(i + 2) {
                    return Some(*handle);
                }
            }
        }
        None
    }
}

/// An open binder device plus one remote object handle.
pub struct BinderClient {
    file: File,
    flavor: Flavor,
    iface: String,
    handle: u32,
    /// Transactions are strictly serialized per client.
    lock: Mutex<()>,
    map_addr: *mut libc::c_void,
}

// The mmap'ed receive buffer is only touched under `lock`.
unsafe impl Send for BinderClient {}
unsafe impl Sync for BinderClient {}

fn open_binder(device: &str) -> Result<(File, *mut libc::c_void)> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(device)
        .map_err(|e| Error::DeviceUnavailable(format!("open {device}: {e}")))?;

    let mut version: i32 = 0;
    let res = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            BINDER_VERSION as libc::c_ulong,
            &mut version,
        )
    };
    if res < 0 || version != BINDER_CURRENT_PROTOCOL_VERSION {
        return Err(Error::DeviceUnavailable(format!(
            "{device}: unsupported binder version {version}"
        )));
    }

    let max_threads: u32 = 0;
    unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            BINDER_SET_MAX_THREADS as libc::c_ulong,
            &max_threads,
        );
    }

    let map_addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            BINDER_VM_SIZE,
            libc::PROT_READ,
            libc::MAP_PRIVATE | libc::MAP_NORESERVE,
            file.as_raw_fd(),
            0,
        )
    };
    if map_addr == libc::MAP_FAILED {
        return Err(Error::DeviceUnavailable(format!(
            "{device}: binder mmap failed"
        )));
    }

    Ok((file, map_addr))
}

/// One BC_TRANSACTION / BR_REPLY round trip on an open device.
fn transact_raw(
    file: &File,
    target_handle: u32,
    code: u32,
    parcel: &Parcel,
) -> Result<ReplyParcel> {
    // The driver reads the command stream unaligned: a u32 code
    // directly followed by its payload.
    #[repr(C, packed)]
    struct TransactionCommand {
        cmd: u32,
        tr: BinderTransactionData,
    }

    #[repr(C, packed)]
    struct FreeBufferCommand {
        cmd: u32,
        buffer: usize,
    }

    let payload = parcel.as_slice();
    let command = TransactionCommand {
        cmd: BC_TRANSACTION,
        tr: BinderTransactionData {
            target: target_handle as usize,
            cookie: 0,
            code,
            flags: 0,
            sender_pid: 0,
            sender_euid: 0,
            data_size: payload.len(),
            offsets_size: 0,
            data_buffer: payload.as_ptr() as usize,
            data_offsets: 0,
        },
    };

    let mut read_buf = [0u8; 512];
    let mut sent = false;
    loop {
        let mut bwr = BinderWriteRead {
            write_size: if sent {
                0
            } else {
                mem::size_of::<TransactionCommand>() as libc::c_ulong
            },
            write_consumed: 0,
            write_buffer: &command as *const TransactionCommand as libc::c_ulong,
            read_size: read_buf.len() as libc::c_ulong,
            read_consumed: 0,
            read_buffer: read_buf.as_mut_ptr() as libc::c_ulong,
        };

        let res = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                BINDER_WRITE_READ as libc::c_ulong,
                &mut bwr,
            )
        };
        if res < 0 {
            return Err(Error::DeviceIo(format!(
                "BINDER_WRITE_READ: {}",
                std::io::Error::last_os_error()
            )));
        }
        sent = true;

        // Walk the returned command stream
        let mut pos = 0usize;
        let consumed = bwr.read_consumed as usize;
        while pos + 4 <= consumed {
            let cmd = u32::from_ne_bytes(read_buf[pos..pos + 4].try_into().unwrap());
            pos += 4;
            match cmd {
                BR_NOOP | BR_SPURIOUS_WAKEUP | BR_TRANSACTION_COMPLETE => {}
                BR_ERROR => {
                    let code = i32::from_ne_bytes(read_buf[pos..pos + 4].try_into().unwrap());
                    return Err(Error::DeviceIo(format!("binder error {code}")));
                }
                BR_DEAD_REPLY => {
                    return Err(Error::DeviceIo("binder target died".to_string()));
                }
                BR_FAILED_REPLY => {
                    return Err(Error::DeviceIo("binder transaction failed".to_string()));
                }
                BR_REPLY => {
                    let tr_size = mem::size_of::<BinderTransactionData>();
                    if pos + tr_size > consumed {
                        return Err(Error::DeviceIo("Truncated binder reply".to_string()));
                    }
                    let tr: BinderTransactionData = unsafe {
                        std::ptr::read_unaligned(read_buf[pos..].as_ptr() as *const _)
                    };
                    let reply_data = unsafe {
                        std::slice::from_raw_parts(tr.data_buffer as *const u8, tr.data_size)
                    }
                    .to_vec();

                    // Hand the kernel buffer back
                    let free = FreeBufferCommand {
                        cmd: BC_FREE_BUFFER,
                        buffer: tr.data_buffer,
                    };
                    let mut free_bwr = BinderWriteRead {
                        write_size: mem::size_of::<FreeBufferCommand>() as libc::c_ulong,
                        write_consumed: 0,
                        write_buffer: &free as *const _ as libc::c_ulong,
                        read_size: 0,
                        read_consumed: 0,
                        read_buffer: 0,
                    };
                    unsafe {
                        libc::ioctl(
                            file.as_raw_fd(),
                            BINDER_WRITE_READ as libc::c_ulong,
                            &mut free_bwr,
                        );
                    }

                    return Ok(ReplyParcel::new(reply_data));
                }
                other => {
                    debug!("Skipping binder return code {other:#x}");
                    // Unknown commands carry no payload we can skip
                    // reliably; bail out.
                    return Err(Error::DeviceIo(format!(
                        "Unexpected binder return {other:#x}"
                    )));
                }
            }
        }
    }
}

impl BinderClient {
    /// Connect to a named HAL service via the device's service
    /// manager.
    pub fn connect(flavor: Flavor, iface: &str, instance: &str) -> Result<Self> {
        let device = match flavor {
            Flavor::Aidl => "/dev/binder",
            Flavor::Hidl => "/dev/hwbinder",
        };
        let (file, map_addr) = open_binder(device)?;

        // Service manager is the context manager at handle 0
        let handle = match flavor {
            Flavor::Aidl => {
                let fqname = format!("{iface}/{instance}");
                let mut parcel = Parcel::new();
                parcel.write_interface_token(flavor, "android.os.IServiceManager");
                parcel.write_string16(&fqname);
                // IServiceManager::checkService
                let mut reply = transact_raw(&file, 0, 2, &parcel)?;
                reply.read_status()?;
                reply.find_handle()
            }
            Flavor::Hidl => {
                let mut parcel = Parcel::new();
                parcel.write_interface_token(flavor, "android.hidl.manager@1.0::IServiceManager");
                parcel.write_string16(iface);
                parcel.write_string16(instance);
                // IServiceManager::get
                let mut reply = transact_raw(&file, 0, 1, &parcel)?;
                reply.read_status()?;
                reply.find_handle()
            }
        };

        let Some(handle) = handle else {
            return Err(Error::DeviceUnavailable(format!(
                "No binder service for {iface}"
            )));
        };

        debug!("Got binder service {iface} at handle {handle}");
        Ok(Self {
            file,
            flavor,
            iface: iface.to_string(),
            handle,
            lock: Mutex::new(()),
            map_addr,
        })
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Fresh parcel with this client's interface token.
    pub fn request(&self) -> Parcel {
        let mut parcel = Parcel::new();
        parcel.write_interface_token(self.flavor, &self.iface);
        parcel
    }

    /// Synchronous transaction against the remote service.
    pub fn transact(&self, code: u32, parcel: &Parcel) -> Result<ReplyParcel> {
        let _guard = self.lock.lock().unwrap();
        transact_raw(&self.file, self.handle, code, parcel)
    }
}

impl Drop for BinderClient {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map_addr, BINDER_VM_SIZE);
        }
    }
}
