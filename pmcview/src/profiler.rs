//! The top-level run: open the log, replay it, resolve, expose the model.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use pmcview_symbols::ImageCache;

use crate::aggregation::{AggregationRegistry, SampleAggregation};
use crate::dispatch::{DispatchError, EventDispatcher};
use crate::event_log::{EventLogReader, LogError};

pub struct Config {
    pub data_file: PathBuf,
    pub show_lines: bool,
    pub module_path: Vec<String>,
    pub pid_filter: HashSet<i32>,
    pub include_templates: bool,
    pub quit_on_error: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("could not open data file {}: {}", .0.display(), .1)]
    OpenDataFile(PathBuf, #[source] std::io::Error),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// The resolved model printers consume.
pub struct Profile {
    pub images: ImageCache,
    pub registry: AggregationRegistry,
    pub sample_count: u64,
    pub show_lines: bool,
}

impl Profile {
    /// Non-empty aggregations, most samples first.
    pub fn aggregations(&self) -> Vec<&SampleAggregation> {
        self.registry.sorted()
    }
}

pub fn run(config: &Config) -> Result<Profile, ProfileError> {
    let file = File::open(&config.data_file)
        .map_err(|err| ProfileError::OpenDataFile(config.data_file.clone(), err))?;
    let reader = EventLogReader::new(BufReader::new(file))?;

    let mut dispatcher = EventDispatcher::new(
        config.module_path.clone(),
        config.pid_filter.clone(),
        config.include_templates,
        config.quit_on_error,
    );
    for event in reader {
        dispatcher.dispatch(event?)?;
    }

    let (images, registry, sample_count) = dispatcher.into_parts();
    Ok(Profile {
        images,
        registry,
        sample_count,
        show_lines: config.show_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::{run, Config};
    use crate::event_log::{LOG_MAGIC, LOG_VERSION, RECORD_CALLCHAIN, RECORD_MAP_IN};
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::collections::HashSet;

    fn config(data_file: std::path::PathBuf) -> Config {
        Config {
            data_file,
            show_lines: false,
            module_path: Vec::new(),
            pid_filter: HashSet::new(),
            include_templates: false,
            quit_on_error: false,
        }
    }

    #[test]
    fn missing_data_file_is_an_error() {
        let err = run(&config("/nonexistent/samples.out".into())).err().unwrap();
        assert!(err.to_string().contains("could not open data file"));
    }

    #[test]
    fn symbols_resolve_through_a_mapped_image() {
        use object::write::{Object, Symbol, SymbolSection};
        use object::{
            Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind,
            SymbolScope,
        };

        let dir = tempfile::tempdir().unwrap();

        let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
        obj.append_section_data(text, &[0x90u8; 0x1000], 16);
        obj.add_symbol(Symbol {
            name: b"main".to_vec(),
            value: 0x500,
            size: 0x100,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
        let elf_path = dir.path().join("dd");
        std::fs::write(&elf_path, obj.write().unwrap()).unwrap();
        let elf_path_str = elf_path.to_str().unwrap();

        let log_path = dir.path().join("samples.out");
        let mut log = Vec::new();
        log.extend_from_slice(&LOG_MAGIC);
        log.write_u32::<LittleEndian>(LOG_VERSION).unwrap();

        let mut payload = Vec::new();
        payload.write_i32::<LittleEndian>(5).unwrap();
        payload.write_u64::<LittleEndian>(0x400000).unwrap();
        payload
            .write_u16::<LittleEndian>(elf_path_str.len() as u16)
            .unwrap();
        payload.extend_from_slice(elf_path_str.as_bytes());
        log.write_u32::<LittleEndian>(RECORD_MAP_IN).unwrap();
        log.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
        log.extend_from_slice(&payload);

        let mut payload = Vec::new();
        payload.write_i32::<LittleEndian>(5).unwrap();
        payload.write_u32::<LittleEndian>(1).unwrap();
        payload.write_u32::<LittleEndian>(1).unwrap();
        payload.write_u64::<LittleEndian>(0x400540).unwrap();
        log.write_u32::<LittleEndian>(RECORD_CALLCHAIN).unwrap();
        log.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
        log.extend_from_slice(&payload);

        std::fs::write(&log_path, &log).unwrap();

        let profile = run(&config(log_path)).unwrap();
        let aggregations = profile.aggregations();
        assert_eq!(aggregations.len(), 1);

        let chain = aggregations[0].callchains().next().unwrap();
        assert!(chain.is_mapped(&profile.images));
        let leaf = chain.leaf_frame(&profile.images).unwrap();
        assert_eq!(leaf.func().as_str(), "main");
        assert_eq!(leaf.file().as_str(), elf_path_str);
        assert_eq!(leaf.code_line(), -1);
        assert_eq!(leaf.offset(), 0x53f);

        use crate::printers::{flamegraph::FlameGraphPrinter, ProfilePrinter};
        let mut out = Vec::new();
        FlameGraphPrinter.print(&profile, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "main 1\n");
    }

    #[test]
    fn end_to_end_over_a_written_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("samples.out");

        let mut log = Vec::new();
        log.extend_from_slice(&LOG_MAGIC);
        log.write_u32::<LittleEndian>(LOG_VERSION).unwrap();

        let mut payload = Vec::new();
        payload.write_i32::<LittleEndian>(1).unwrap();
        payload.write_u64::<LittleEndian>(0).unwrap();
        payload.write_u16::<LittleEndian>(6).unwrap();
        payload.extend_from_slice(b"/bin/a");
        log.write_u32::<LittleEndian>(RECORD_MAP_IN).unwrap();
        log.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
        log.extend_from_slice(&payload);

        for _ in 0..3 {
            let mut payload = Vec::new();
            payload.write_i32::<LittleEndian>(1).unwrap();
            payload.write_u32::<LittleEndian>(1).unwrap();
            payload.write_u32::<LittleEndian>(3).unwrap();
            for pc in [0x80u64, 0x40, 0x20] {
                payload.write_u64::<LittleEndian>(pc).unwrap();
            }
            log.write_u32::<LittleEndian>(RECORD_CALLCHAIN).unwrap();
            log.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
            log.extend_from_slice(&payload);
        }
        std::fs::write(&log_path, &log).unwrap();

        let profile = run(&config(log_path)).unwrap();
        assert_eq!(profile.sample_count, 3);

        let aggregations = profile.aggregations();
        assert_eq!(aggregations.len(), 1);
        let agg = aggregations[0];
        assert_eq!(agg.executable_name().as_str(), "/bin/a");
        assert_eq!(agg.sample_count(), 3);
        assert_eq!(agg.callchains().count(), 1);

        let chain = agg.callchains().next().unwrap();
        assert_eq!(chain.sample_count(), 3);
        assert_eq!(chain.records().len(), 3);
    }
}
