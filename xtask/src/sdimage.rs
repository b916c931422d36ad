//! Raw SD card image assembly.
//!
//! The loader reads fixed block ranges, so the images have to sit exactly
//! where the boot plan expects them. An image larger than its range would
//! boot truncated; that is refused here instead.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use bootcore::{BLOCK_SIZE, BootPlan, ImageSpec};

/// One input image and the plan entry it fills.
struct Placement<'a> {
    image: &'a ImageSpec,
    data: &'a [u8],
}

impl Placement<'_> {
    fn offset(&self) -> u64 {
        u64::from(self.image.blocks.start) * BLOCK_SIZE as u64
    }

    fn check(&self) -> Result<()> {
        let capacity = self.image.blocks.byte_len();
        if self.data.is_empty() {
            bail!("{} is empty", self.image.name);
        }
        if self.data.len() > capacity {
            bail!(
                "{} is {} bytes but blocks {}..{} hold only {} bytes",
                self.image.name,
                self.data.len(),
                self.image.blocks.start,
                self.image.blocks.end(),
                capacity
            );
        }
        Ok(())
    }
}

/// Write `device_tree` and `kernel` into `out` at their block offsets.
///
/// The output is zero-filled up to the end of the last range, so the
/// loader never reads past the end of a file-backed card.
/// Returns the total image length in bytes.
pub fn assemble<W: Write + Seek>(
    plan: &BootPlan,
    device_tree: &[u8],
    kernel: &[u8],
    out: &mut W,
) -> Result<u64> {
    let placements = [
        Placement {
            image: &plan.device_tree,
            data: device_tree,
        },
        Placement {
            image: &plan.kernel,
            data: kernel,
        },
    ];

    let mut end: u64 = 0;
    for placement in &placements {
        placement.check()?;
        out.seek(SeekFrom::Start(placement.offset()))?;
        out.write_all(placement.data)
            .with_context(|| format!("writing {}", placement.image.name))?;
        end = end.max(placement.image.blocks.end() * BLOCK_SIZE as u64);
    }

    // Extend with zeros to the end of the last range.
    let written = out.seek(SeekFrom::End(0))?;
    if written < end {
        out.seek(SeekFrom::Start(end - 1))?;
        out.write_all(&[0])?;
    }
    out.flush()?;
    Ok(end)
}

/// Assemble an image file from a device tree blob and a kernel image.
pub fn build_file(plan: &BootPlan, dtb: &Path, kernel: &Path, out: &Path) -> Result<u64> {
    let device_tree =
        std::fs::read(dtb).with_context(|| format!("reading {}", dtb.display()))?;
    let kernel_image =
        std::fs::read(kernel).with_context(|| format!("reading {}", kernel.display()))?;

    let mut file = File::create(out).with_context(|| format!("creating {}", out.display()))?;
    assemble(plan, &device_tree, &kernel_image, &mut file)
}

/// Copy an assembled image onto a block device.
pub fn write_to_device(image: &Path, device: &Path) -> Result<u64> {
    let mut source =
        File::open(image).with_context(|| format!("opening {}", image.display()))?;
    let mut target = OpenOptions::new()
        .write(true)
        .open(device)
        .with_context(|| format!("opening {} for writing", device.display()))?;

    let copied = io::copy(&mut source, &mut target)
        .with_context(|| format!("writing {}", device.display()))?;
    target
        .sync_all()
        .with_context(|| format!("syncing {}", device.display()))?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    const PLAN: BootPlan = BootPlan::STM32MP135_DK;

    #[test]
    fn test_images_land_at_their_blocks() {
        let dtb = vec![0xD7; 1000];
        let kernel = vec![0x4B; 4096];
        let mut out = Cursor::new(Vec::new());

        let len = assemble(&PLAN, &dtb, &kernel, &mut out).unwrap();
        let image = out.into_inner();

        assert_eq!(len, (4096 + 14855) * 512);
        assert_eq!(image.len() as u64, len);
        assert!(image[..2048 * 512].iter().all(|&b| b == 0));
        assert_eq!(&image[2048 * 512..2048 * 512 + 1000], &dtb[..]);
        assert!(image[2048 * 512 + 1000..4096 * 512].iter().all(|&b| b == 0));
        assert_eq!(&image[4096 * 512..4096 * 512 + 4096], &kernel[..]);
        assert!(image[4096 * 512 + 4096..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_image_filling_its_range_exactly() {
        let dtb = vec![1; 121 * 512];
        let mut out = Cursor::new(Vec::new());
        assert!(assemble(&PLAN, &dtb, &[2; 512], &mut out).is_ok());
    }

    #[test]
    fn test_rejects_oversized_image() {
        let dtb = vec![0; 121 * 512 + 1];
        let mut out = Cursor::new(Vec::new());
        let err = assemble(&PLAN, &dtb, &[0; 512], &mut out).unwrap_err();
        assert!(err.to_string().contains("DTB is 61953 bytes"));
    }

    #[test]
    fn test_rejects_empty_image() {
        let mut out = Cursor::new(Vec::new());
        let err = assemble(&PLAN, &[1; 16], &[], &mut out).unwrap_err();
        assert!(err.to_string().contains("kernel image is empty"));
    }

    #[test]
    fn test_build_and_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let dtb = dir.path().join("board.dtb");
        let kernel = dir.path().join("zImage");
        let out = dir.path().join("sdcard.img");
        let device = dir.path().join("device");
        std::fs::write(&dtb, b"\xd0\x0d\xfe\xed").unwrap();
        std::fs::write(&kernel, vec![0x11; 2000]).unwrap();
        File::create(&device).unwrap();

        let len = build_file(&PLAN, &dtb, &kernel, &out).unwrap();
        assert_eq!(std::fs::metadata(&out).unwrap().len(), len);

        assert_eq!(write_to_device(&out, &device).unwrap(), len);
        let mut written = File::open(&device).unwrap();
        let mut magic = [0u8; 4];
        written.seek(SeekFrom::Start(2048 * 512)).unwrap();
        written.read_exact(&mut magic).unwrap();
        assert_eq!(&magic, b"\xd0\x0d\xfe\xed");
    }

    #[test]
    fn test_missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.dtb");
        let err = build_file(&PLAN, &missing, &missing, &dir.path().join("out.img")).unwrap_err();
        assert!(err.to_string().starts_with("reading"));
    }
}
