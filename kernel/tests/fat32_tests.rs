use std::sync::Arc;

use pi_kernel::drivers::RamDisk;
use pi_kernel::fs::fat32::{self, Fat32, Fat32Volume};
use pi_kernel::fs::tmpfs::Tmpfs;
use pi_kernel::fs::{
    BlockDevice, MountId, SeekFrom, Vfs, VfsError, VnodeKind, O_APPEND, O_CREAT, O_EXCL,
    O_RDONLY, O_RDWR, O_WRONLY,
};

const DISK_SECTORS: u32 = 4096;

fn formatted_disk(sectors_per_cluster: u8) -> Arc<RamDisk> {
    let disk = Arc::new(RamDisk::new(DISK_SECTORS));
    fat32::format(disk.as_ref(), sectors_per_cluster).unwrap();
    disk
}

/// tmpfs root with `disk` mounted at /mnt
fn vfs_with(disk: Arc<RamDisk>) -> Vfs {
    let vfs = Vfs::new(Tmpfs::descriptor().unwrap()).unwrap();
    vfs.register(Fat32::descriptor(disk).unwrap()).unwrap();
    vfs.mkdir("/mnt").unwrap();
    vfs.mount("/mnt", "fat32").unwrap();
    vfs
}

fn read_all(vfs: &Vfs, path: &str) -> Vec<u8> {
    let fd = vfs.open(path, O_RDONLY).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 100];
    loop {
        match vfs.read(fd, &mut buf).unwrap() {
            0 => break,
            n => out.extend_from_slice(&buf[..n]),
        }
    }
    vfs.close(fd).unwrap();
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// MOUNT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_mount_fresh_volume() {
    let vfs = vfs_with(formatted_disk(1));
    let stat = vfs.stat("/mnt").unwrap();
    assert_eq!(stat.kind, VnodeKind::Directory);
    assert_eq!(stat.mount.0, 2);
    assert!(vfs.read_dir("/mnt").unwrap().is_empty());
}

#[test]
fn test_mount_unformatted_disk_fails() {
    let disk = Arc::new(RamDisk::new(64));
    let vfs = Vfs::new(Tmpfs::descriptor().unwrap()).unwrap();
    vfs.register(Fat32::descriptor(disk.clone()).unwrap()).unwrap();
    vfs.mkdir("/mnt").unwrap();

    assert_eq!(vfs.mount("/mnt", "fat32"), Err(VfsError::Backend("Missing boot signature")));
    // Nothing is left half-mounted
    assert_eq!(vfs.stat("/mnt").unwrap().mount.0, 0);

    fat32::format(disk.as_ref(), 1).unwrap();
    assert_eq!(vfs.mount("/mnt", "fat32"), Ok(MountId(2)));
}

#[test]
fn test_device_mounts_once() {
    let vfs = vfs_with(formatted_disk(1));
    vfs.mkdir("/other").unwrap();

    assert_eq!(vfs.mount("/other", "fat32"), Err(VfsError::Busy));
    assert_eq!(vfs.mounts().len(), 3);
    assert_eq!(vfs.stat("/other").unwrap().mount, MountId(0));

    // The one mount keeps working
    let fd = vfs.open("/mnt/f", O_CREAT | O_WRONLY).unwrap();
    assert_eq!(vfs.write(fd, b"0123456789"), Ok(10));
    vfs.close(fd).unwrap();
    assert_eq!(read_all(&vfs, "/mnt/f"), b"0123456789");
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_create_write_read() {
    let vfs = vfs_with(formatted_disk(1));
    let fd = vfs.open("/mnt/hello.txt", O_CREAT | O_RDWR).unwrap();
    assert_eq!(vfs.write(fd, b"hello, fat"), Ok(10));
    vfs.seek(fd, SeekFrom::Start(0)).unwrap();

    let mut buf = [0u8; 32];
    assert_eq!(vfs.read(fd, &mut buf), Ok(10));
    assert_eq!(&buf[..10], b"hello, fat");
    vfs.close(fd).unwrap();

    let entries = vfs.read_dir("/mnt").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "HELLO.TXT");
    assert_eq!(entries[0].size, 10);
}

#[test]
fn test_names_are_case_insensitive() {
    let vfs = vfs_with(formatted_disk(1));
    let fd = vfs.open("/mnt/Data.Bin", O_CREAT | O_WRONLY).unwrap();
    vfs.write(fd, b"x").unwrap();
    vfs.close(fd).unwrap();

    assert_eq!(vfs.stat("/mnt/DATA.BIN").unwrap().size, 1);
    assert_eq!(vfs.open("/mnt/data.bin", O_CREAT | O_EXCL | O_RDWR), Err(VfsError::AlreadyExists));
}

#[test]
fn test_multi_cluster_file() {
    let vfs = vfs_with(formatted_disk(1));
    let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

    let fd = vfs.open("/mnt/big.dat", O_CREAT | O_WRONLY).unwrap();
    // Odd-sized chunks straddle cluster boundaries
    for chunk in data.chunks(700) {
        assert_eq!(vfs.write(fd, chunk), Ok(chunk.len()));
    }
    vfs.close(fd).unwrap();

    assert_eq!(read_all(&vfs, "/mnt/big.dat"), data);
    assert_eq!(vfs.stat("/mnt/big.dat").unwrap().size, 3000);
}

#[test]
fn test_overwrite_in_place_and_append() {
    let vfs = vfs_with(formatted_disk(2));
    let fd = vfs.open("/mnt/f", O_CREAT | O_RDWR).unwrap();
    vfs.write(fd, &[b'a'; 1500]).unwrap();
    vfs.seek(fd, SeekFrom::Start(1020)).unwrap();
    vfs.write(fd, b"XXXXXXXX").unwrap();
    vfs.close(fd).unwrap();

    let fd = vfs.open("/mnt/f", O_WRONLY | O_APPEND).unwrap();
    vfs.write(fd, b"end").unwrap();
    vfs.close(fd).unwrap();

    let contents = read_all(&vfs, "/mnt/f");
    assert_eq!(contents.len(), 1503);
    assert_eq!(&contents[1018..1030], b"aaXXXXXXXXaa");
    assert_eq!(&contents[1500..], b"end");
}

#[test]
fn test_handles_share_one_inode() {
    let vfs = vfs_with(formatted_disk(1));
    let writer = vfs.open("/mnt/f", O_CREAT | O_WRONLY).unwrap();
    let reader = vfs.open("/mnt/f", O_RDONLY).unwrap();

    vfs.write(writer, &[3u8; 700]).unwrap();
    assert_eq!(vfs.fstat(reader).unwrap().size, 700);
    let mut buf = [0u8; 1024];
    assert_eq!(vfs.read(reader, &mut buf), Ok(700));
}

#[test]
fn test_full_volume_reports_short_write() {
    // 163 free data clusters of 512 bytes
    let disk = Arc::new(RamDisk::new(200));
    fat32::format(disk.as_ref(), 1).unwrap();
    let capacity = Fat32Volume::open(disk.clone()).unwrap().free_clusters().unwrap() as usize * 512;

    let written = {
        let vfs = vfs_with(disk.clone());
        let fd = vfs.open("/mnt/big", O_CREAT | O_RDWR).unwrap();
        let data = vec![0x5Au8; 100 * 1024];

        let written = vfs.write(fd, &data).unwrap();
        assert_eq!(written, capacity);
        assert_eq!(vfs.stat("/mnt/big").unwrap().size, written as u64);

        // Nothing left: the next write fails outright
        assert_eq!(vfs.write(fd, b"more"), Err(VfsError::Backend("Disk full")));
        vfs.close(fd).unwrap();
        written
    };

    // The directory entry owns every allocated cluster
    assert_eq!(Fat32Volume::open(disk.clone()).unwrap().free_clusters(), Ok(0));
    let vfs = vfs_with(disk);
    assert_eq!(vfs.stat("/mnt/big").unwrap().size, written as u64);
    assert_eq!(read_all(&vfs, "/mnt/big"), vec![0x5Au8; written]);
}

#[test]
fn test_seek_past_end_rejected() {
    let vfs = vfs_with(formatted_disk(1));
    let fd = vfs.open("/mnt/f", O_CREAT | O_RDWR).unwrap();
    vfs.write(fd, b"abc").unwrap();
    assert!(vfs.seek(fd, SeekFrom::Start(4)).is_err());
    assert_eq!(vfs.seek(fd, SeekFrom::End(-1)), Ok(2));
}

#[test]
fn test_long_names_rejected() {
    let vfs = vfs_with(formatted_disk(1));
    assert_eq!(vfs.open("/mnt/longfilename", O_CREAT | O_RDWR), Err(VfsError::NameTooLong));
    assert_eq!(vfs.open("/mnt/a.text", O_CREAT | O_RDWR), Err(VfsError::NameTooLong));
    assert_eq!(vfs.open("/mnt/longfilename", O_RDWR), Err(VfsError::NotFound));
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTORIES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_mkdir_and_nested_files() {
    let vfs = vfs_with(formatted_disk(1));
    vfs.mkdir("/mnt/lll").unwrap();
    vfs.mkdir("/mnt/lll/sub").unwrap();
    let fd = vfs.open("/mnt/lll/sub/ddd", O_CREAT | O_RDWR).unwrap();
    vfs.write(fd, b"deep").unwrap();
    vfs.close(fd).unwrap();

    assert_eq!(read_all(&vfs, "/mnt/lll/sub/ddd"), b"deep");
    assert_eq!(vfs.mkdir("/mnt/lll"), Err(VfsError::AlreadyExists));

    let entries = vfs.read_dir("/mnt/lll").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "SUB");
    assert_eq!(entries[0].kind, VnodeKind::Directory);
}

#[test]
fn test_directory_grows() {
    // 16 entries fit in one 512-byte cluster
    let vfs = vfs_with(formatted_disk(1));
    for i in 0..40 {
        let fd = vfs.open(&format!("/mnt/f{}", i), O_CREAT | O_WRONLY).unwrap();
        vfs.close(fd).unwrap();
    }
    assert_eq!(vfs.read_dir("/mnt").unwrap().len(), 40);
    assert!(vfs.resolve("/mnt/f39").is_ok());
}

#[test]
fn test_mount_on_fat_directory() {
    let vfs = vfs_with(formatted_disk(1));
    vfs.mkdir("/mnt/tmp").unwrap();
    let id = vfs.mount("/mnt/tmp", "tmpfs").unwrap();

    let fd = vfs.open("/mnt/tmp/scratch", O_CREAT | O_RDWR).unwrap();
    vfs.close(fd).unwrap();
    assert_eq!(vfs.stat("/mnt/tmp/scratch").unwrap().mount, id);
    assert!(vfs.read_dir("/mnt").unwrap().iter().all(|e| e.name != "SCRATCH"));
}

// ═══════════════════════════════════════════════════════════════════════════════
// PERSISTENCE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_data_survives_remount() {
    let disk = formatted_disk(1);
    {
        let vfs = vfs_with(disk.clone());
        vfs.mkdir("/mnt/keep").unwrap();
        let fd = vfs.open("/mnt/keep/note.txt", O_CREAT | O_WRONLY).unwrap();
        vfs.write(fd, &[7u8; 1234]).unwrap();
        vfs.close(fd).unwrap();
    }

    let vfs = vfs_with(disk);
    assert_eq!(vfs.stat("/mnt/keep/note.txt").unwrap().size, 1234);
    assert_eq!(read_all(&vfs, "/mnt/keep/note.txt"), vec![7u8; 1234]);
}

#[test]
fn test_image_round_trips_through_bytes() {
    let disk = formatted_disk(1);
    {
        let vfs = vfs_with(disk.clone());
        let fd = vfs.open("/mnt/img", O_CREAT | O_WRONLY).unwrap();
        vfs.write(fd, b"from image").unwrap();
        vfs.close(fd).unwrap();
    }

    let copy = Arc::new(RamDisk::from_image(disk.snapshot()));
    assert_eq!(copy.sector_count(), DISK_SECTORS);
    let vfs = vfs_with(copy);
    assert_eq!(read_all(&vfs, "/mnt/img"), b"from image");
}

#[test]
fn test_allocation_accounting() {
    let disk = formatted_disk(1);
    let volume = Fat32Volume::open(disk.clone()).unwrap();
    let before = volume.free_clusters().unwrap();

    let vfs = vfs_with(disk.clone());
    let fd = vfs.open("/mnt/f", O_CREAT | O_WRONLY).unwrap();
    vfs.write(fd, &[1u8; 1025]).unwrap(); // 3 clusters
    vfs.close(fd).unwrap();
    vfs.mkdir("/mnt/d").unwrap(); // 1 cluster

    let volume = Fat32Volume::open(disk).unwrap();
    assert_eq!(volume.free_clusters().unwrap(), before - 4);
}
