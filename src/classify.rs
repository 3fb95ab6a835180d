//! ELF/DWARF classification of candidate files.
//!
//! Decides whether a byte stream is an ELF image, whether it is worth
//! serving as an executable and/or as debuginfo, extracts the build ID,
//! and lists the absolute source paths its line tables refer to.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::io;

use object::elf::{ET_DYN, ET_EXEC, SHF_ALLOC, SHT_PROGBITS};
use object::read::elf::{FileHeader, SectionHeader};
use object::{Endianness, FileKind, Object, ObjectSection};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("corrupt ELF image: {0}")]
    CorruptElf(#[from] object::read::Error),

    #[error("cannot read object contents: {0}")]
    Io(#[from] io::Error),
}

/// What we learned about one candidate file.
///
/// A non-ELF input, or an ELF without a build ID, yields
/// [`Classification::negative`]; that case is deliberately not an error so
/// that scanners can record it in the negative cache.
#[derive(Debug, Default, Clone)]
pub struct Classification {
    pub is_executable: bool,
    pub is_debuginfo: bool,
    /// Lowercase hex form of the GNU build ID note, or empty.
    pub build_id: String,
    /// Absolute source paths referenced by the debug line program.
    pub source_paths: BTreeSet<String>,
}

impl Classification {
    pub fn negative() -> Self {
        Classification::default()
    }

    pub fn is_negative(&self) -> bool {
        !self.is_executable && !self.is_debuginfo
    }
}

/// Classify an open file by mapping it into memory.
pub fn classify_file(file: &std::fs::File) -> Result<Classification, ClassifyError> {
    if file.metadata()?.len() == 0 {
        return Ok(Classification::negative());
    }
    let mmap = unsafe { memmap2::Mmap::map(file)? };
    classify_bytes(&mmap)
}

pub fn classify_bytes(data: &[u8]) -> Result<Classification, ClassifyError> {
    match FileKind::parse(data) {
        Ok(FileKind::Elf32) => classify_elf::<object::elf::FileHeader32<Endianness>>(data),
        Ok(FileKind::Elf64) => classify_elf::<object::elf::FileHeader64<Endianness>>(data),
        // Not an ELF at all. It might just be a text file; no diagnostic.
        _ => Ok(Classification::negative()),
    }
}

fn classify_elf<Elf: FileHeader<Endian = Endianness>>(
    data: &[u8],
) -> Result<Classification, ClassifyError> {
    let header = Elf::parse(data)?;
    let endian = header.endian()?;
    let obj = object::File::parse(data)?;

    let build_id = match obj.build_id()? {
        Some(bytes) => to_hex(bytes),
        // An ELF without a build ID is not diagnostic-worthy either; it
        // might just be very old. There is nothing to index it under.
        None => return Ok(Classification::negative()),
    };

    let e_type = header.e_type(endian);
    let sections = header.sections(endian, data)?;

    let mut is_executable = false;
    let mut is_debuginfo = false;
    let mut has_line_program = false;
    for section in sections.iter() {
        // Only executables and shared objects can be executable, and only
        // when some allocatable section carries program bits.
        if (e_type == ET_EXEC || e_type == ET_DYN)
            && section.sh_type(endian) == SHT_PROGBITS
            && Into::<u64>::into(section.sh_flags(endian)) & u64::from(SHF_ALLOC) != 0
        {
            is_executable = true;
        }

        let name = match sections.section_name(endian, section) {
            Ok(name) => name,
            Err(_) => continue,
        };
        if name.starts_with(b".debug_") || name.starts_with(b".zdebug_") {
            is_debuginfo = true;
            if name == b".debug_line" || name == b".zdebug_line" {
                has_line_program = true;
            }
        }
    }

    let mut source_paths = BTreeSet::new();
    if has_line_program {
        collect_source_paths(&obj, &mut source_paths);
    }

    Ok(Classification {
        is_executable,
        is_debuginfo,
        build_id,
        source_paths,
    })
}

/// Walk the debug line table of every compilation unit and collect the
/// referenced file names, made absolute against the unit's compilation
/// directory. DWARF parse problems are not fatal; whatever was gathered up
/// to that point stands.
fn collect_source_paths(obj: &object::File, out: &mut BTreeSet<String>) {
    let endian = if obj.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let load_section = |id: gimli::SectionId| -> Result<Cow<[u8]>, gimli::Error> {
        match obj.section_by_name(id.name()) {
            Some(section) => Ok(section
                .uncompressed_data()
                .unwrap_or(Cow::Borrowed(&[][..]))),
            None => Ok(Cow::Borrowed(&[][..])),
        }
    };
    let dwarf_sections = match gimli::Dwarf::load(load_section) {
        Ok(dwarf) => dwarf,
        Err(_) => return,
    };
    let dwarf = dwarf_sections.borrow(|section| gimli::EndianSlice::new(section, endian));

    let mut headers = dwarf.units();
    loop {
        let header = match headers.next() {
            Ok(Some(header)) => header,
            Ok(None) | Err(_) => break,
        };
        let unit = match dwarf.unit(header) {
            Ok(unit) => unit,
            Err(_) => continue,
        };
        let comp_dir = unit
            .comp_dir
            .map(|r| String::from_utf8_lossy(r.slice()).into_owned())
            .unwrap_or_default();

        let program = match &unit.line_program {
            Some(program) => program,
            None => continue,
        };
        let line_header = program.header();
        for file in line_header.file_names() {
            let name = match dwarf.attr_string(&unit, file.path_name()) {
                Ok(name) => String::from_utf8_lossy(name.slice()).into_owned(),
                Err(_) => continue,
            };
            if name.is_empty() {
                continue;
            }

            let mut path = name;
            if !path.starts_with('/') {
                if let Some(dir) = file
                    .directory(line_header)
                    .and_then(|attr| dwarf.attr_string(&unit, attr).ok())
                {
                    let dir = String::from_utf8_lossy(dir.slice());
                    if !dir.is_empty() {
                        path = format!("{dir}/{path}");
                    }
                }
            }
            if !path.starts_with('/') && !comp_dir.is_empty() {
                // This is the name a debuginfo client will have to supply
                // to get the file back.
                path = format!("{comp_dir}/{path}");
            }
            out.insert(path);
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
