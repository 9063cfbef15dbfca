//! Per-process (and kernel) view of which image is mapped where.

use std::fs::File;
use std::path::Path;

use pmcview_symbols::{elf, intern, FrameRef, ImageCache, ImageHandle, InternedString, RangeMap};

struct LoadedImage {
    image: ImageHandle,
    load_offset: u64,
}

/// An ordered map from load address to image, searched by "last mapping at
/// or below the address". The first image ever mapped becomes the
/// executable. Every mapping records the delta between where it was
/// mapped and where its ELF asked to be loaded; subtracting that delta
/// turns an absolute sampled address back into an image-relative offset.
pub struct AddressSpace {
    map: RangeMap<LoadedImage>,
    executable: Option<ImageHandle>,
}

impl AddressSpace {
    pub fn new() -> Self {
        AddressSpace {
            map: RangeMap::new(),
            executable: None,
        }
    }

    pub fn map_in(&mut self, images: &mut ImageCache, start: u64, path: &str) {
        let image = images.get_image(path);
        self.map_image(images, start, image);
    }

    fn map_image(&mut self, images: &ImageCache, start: u64, image: ImageHandle) {
        if self.map.is_empty() {
            self.executable = Some(image);
        }
        let path = images.image(image).path().clone();
        let load_offset = start.wrapping_sub(elf::preferred_load_address(Path::new(path.as_str())));
        self.map.insert(start, LoadedImage { image, load_offset });
    }

    /// Probe each directory in `search_path` for `name` and map the first
    /// hit. On a miss the unmapped-image sentinel takes the slot so the
    /// region still attributes samples; returns whether the file was found.
    pub fn find_and_map(
        &mut self,
        images: &mut ImageCache,
        start: u64,
        search_path: &[String],
        name: &str,
    ) -> bool {
        for dir in search_path {
            let candidate = Path::new(dir).join(name);
            if File::open(&candidate).is_err() {
                continue;
            }
            if let Some(path) = candidate.to_str() {
                self.map_in(images, start, path);
                return true;
            }
        }
        let unmapped = images.unmapped_image();
        self.map_image(images, start, unmapped);
        false
    }

    /// An exec maps the new executable at its preferred load address.
    pub fn process_exec(&mut self, images: &mut ImageCache, path: &str) {
        let load_addr = elf::preferred_load_address(Path::new(path));
        self.map_in(images, load_addr, path);
    }

    /// Demand the callframe for an absolute address. Addresses below every
    /// mapping fall through to the unmapped image.
    pub fn map_frame(&mut self, images: &mut ImageCache, addr: u64) -> FrameRef {
        match self.map.lookup_le(addr) {
            Some((_, loaded)) => {
                let image = loaded.image;
                let offset = addr.wrapping_sub(loaded.load_offset);
                images.get_frame(image, offset)
            }
            None => {
                let unmapped = images.unmapped_image();
                images.get_frame(unmapped, addr)
            }
        }
    }

    pub fn executable_name(&self, images: &ImageCache) -> InternedString {
        match self.executable {
            Some(handle) => images.image(handle).path().clone(),
            None => intern("<unknown>"),
        }
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::AddressSpace;
    use pmcview_symbols::ImageCache;

    #[test]
    fn first_mapping_becomes_the_executable() {
        let mut images = ImageCache::new(false);
        let mut space = AddressSpace::new();
        space.map_in(&mut images, 0x400000, "/nonexistent/dd");

        assert_eq!(space.executable_name(&images).as_str(), "/nonexistent/dd");

        // The file does not exist, so its preferred base is 0 and the
        // mapping address itself is the relocation delta.
        let frame_ref = space.map_frame(&mut images, 0x400540);
        assert_eq!(frame_ref.offset, 0x540);
        assert_eq!(
            images.image(frame_ref.image).path().as_str(),
            "/nonexistent/dd"
        );
    }

    #[test]
    fn executable_slot_survives_later_mappings() {
        let mut images = ImageCache::new(false);
        let mut space = AddressSpace::new();
        space.map_in(&mut images, 0x400000, "/nonexistent/dd");
        space.map_in(&mut images, 0x800000000, "/lib/libc.so.7");
        assert_eq!(space.executable_name(&images).as_str(), "/nonexistent/dd");

        // A library that does not exist on disk has preferred base 0, so
        // the mapping offset equals its load address.
        let frame_ref = space.map_frame(&mut images, 0x800000123);
        assert_eq!(
            images.image(frame_ref.image).path().as_str(),
            "/lib/libc.so.7"
        );
        assert_eq!(frame_ref.offset, 0x123);
    }

    #[test]
    fn address_below_every_mapping_is_unmapped() {
        let mut images = ImageCache::new(false);
        let mut space = AddressSpace::new();
        space.map_in(&mut images, 0x400000, "/nonexistent/dd");

        let frame_ref = space.map_frame(&mut images, 0x1000);
        assert_eq!(frame_ref.image, images.unmapped_image());
        assert_eq!(frame_ref.offset, 0x1000);
    }

    #[test]
    fn empty_space_maps_everything_to_the_unmapped_image() {
        let mut images = ImageCache::new(false);
        let mut space = AddressSpace::new();
        assert_eq!(space.executable_name(&images).as_str(), "<unknown>");

        let frame_ref = space.map_frame(&mut images, 0x1233);
        assert_eq!(frame_ref.image, images.unmapped_image());
    }

    #[test]
    fn module_search_miss_maps_the_sentinel() {
        let mut images = ImageCache::new(false);
        let mut space = AddressSpace::new();
        let found = space.find_and_map(
            &mut images,
            0xffff0000,
            &["/nonexistent-dir".to_string()],
            "if_em.ko",
        );
        assert!(!found);

        let frame_ref = space.map_frame(&mut images, 0xffff0100);
        assert_eq!(frame_ref.image, images.unmapped_image());
        assert_eq!(frame_ref.offset, 0x100);
    }

    #[test]
    fn module_search_hit_maps_the_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("if_em.ko"), b"stub").unwrap();

        let mut images = ImageCache::new(false);
        let mut space = AddressSpace::new();
        let found = space.find_and_map(
            &mut images,
            0xffff0000,
            &[dir.path().to_str().unwrap().to_string()],
            "if_em.ko",
        );
        assert!(found);

        let frame_ref = space.map_frame(&mut images, 0xffff0100);
        assert!(images
            .image(frame_ref.image)
            .path()
            .as_str()
            .ends_with("if_em.ko"));
    }
}
