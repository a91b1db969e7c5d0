// Ramdisk manifest. This file is rewritten by the image packer, which
// concatenates the file contents into the raw disk image and emits one entry
// per file: (name, size, offset into the image). A fresh checkout ships with
// an empty image and an empty table; entries registered at run time (tests,
// ad-hoc images) take the same shape.

pub struct DiskFile {
    pub name: &'static str,
    pub size: usize,
    pub disk_offset: usize,
}

pub static RAMDISK_FILES: &[DiskFile] = &[];
