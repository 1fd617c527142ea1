//! Sorted-file identity: generation, format, version, and component set.
//!
//! A sorted file is a set of component files sharing one descriptor:
//!
//! ```text
//! <table-dir>/<format>-<version>-<generation>-<component>.<ext>
//! ```
//!
//! e.g. `big-na-42-Data.db`, `big-na-42-TOC.txt`. The generation is
//! monotonic within a table; format and version name the reader/writer
//! implementation that produced the file.

use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

// ------------------------------------------------------------------------------------------------
// Formats
// ------------------------------------------------------------------------------------------------

/// The closed set of sorted-file formats.
///
/// Both formats satisfy the same reader/writer contract and coexist in one
/// table; readers pick the implementation from the filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SSTableFormat {
    /// Default block-oriented format.
    Big,

    /// Format with a denser per-partition index, preferred for tables with
    /// very wide partitions.
    Indexed,
}

impl SSTableFormat {
    /// Filename tag of the format.
    pub fn as_str(self) -> &'static str {
        match self {
            SSTableFormat::Big => "big",
            SSTableFormat::Indexed => "idx",
        }
    }

    /// Current on-disk version of this format.
    pub fn current_version(self) -> &'static str {
        match self {
            SSTableFormat::Big => "na",
            SSTableFormat::Indexed => "da",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "big" => Some(SSTableFormat::Big),
            "idx" => Some(SSTableFormat::Indexed),
            _ => None,
        }
    }
}

impl fmt::Display for SSTableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ------------------------------------------------------------------------------------------------
// Components
// ------------------------------------------------------------------------------------------------

/// The component files making up one sorted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// Partition data blocks.
    Data,

    /// Primary index: one entry per partition.
    Index,

    /// Bloom filter over partition keys.
    Filter,

    /// Statistics and metadata.
    Statistics,

    /// Table of contents listing the component set.
    Toc,
}

impl Component {
    /// Every component a complete sorted file carries.
    pub const ALL: [Component; 5] = [
        Component::Data,
        Component::Index,
        Component::Filter,
        Component::Statistics,
        Component::Toc,
    ];

    /// Filename tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Component::Data => "Data",
            Component::Index => "Index",
            Component::Filter => "Filter",
            Component::Statistics => "Statistics",
            Component::Toc => "TOC",
        }
    }

    /// Filename extension.
    pub fn extension(self) -> &'static str {
        match self {
            Component::Toc => "txt",
            _ => "db",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "Data" => Some(Component::Data),
            "Index" => Some(Component::Index),
            "Filter" => Some(Component::Filter),
            "Statistics" => Some(Component::Statistics),
            "TOC" => Some(Component::Toc),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Descriptor
// ------------------------------------------------------------------------------------------------

/// Identity of one sorted file within its table directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    /// Directory holding the component files.
    pub dir: PathBuf,

    /// Generation number, monotonic within the table.
    pub generation: u64,

    /// Format that wrote the file.
    pub format: SSTableFormat,
}

impl Descriptor {
    /// Descriptor for a new file of the given generation.
    pub fn new(dir: impl Into<PathBuf>, generation: u64, format: SSTableFormat) -> Self {
        Self {
            dir: dir.into(),
            generation,
            format,
        }
    }

    /// Filename of one component.
    pub fn filename(&self, component: Component) -> String {
        format!(
            "{}-{}-{}-{}.{}",
            self.format.as_str(),
            self.format.current_version(),
            self.generation,
            component.as_str(),
            component.extension()
        )
    }

    /// Full path of one component.
    pub fn path(&self, component: Component) -> PathBuf {
        self.dir.join(self.filename(component))
    }

    /// Parse a component path back into `(descriptor, component)`.
    ///
    /// Returns `None` for paths that are not sorted-file components (other
    /// engine files share the directory).
    pub fn parse(path: &Path) -> Option<(Descriptor, Component)> {
        let name = path.file_name().and_then(OsStr::to_str)?;
        let stem = name.rsplit_once('.').map(|(stem, _)| stem)?;

        let mut parts = stem.splitn(4, '-');
        let format = SSTableFormat::parse(parts.next()?)?;
        let version = parts.next()?;
        if version != format.current_version() {
            return None;
        }
        let generation: u64 = parts.next()?.parse().ok()?;
        let component = Component::parse(parts.next()?)?;

        let dir = path.parent()?.to_path_buf();
        Some((
            Descriptor {
                dir,
                generation,
                format,
            },
            component,
        ))
    }

    /// True when every component file exists.
    pub fn is_complete(&self) -> bool {
        Component::ALL
            .iter()
            .all(|component| self.path(*component).exists())
    }

    /// Remove every existing component file.
    pub fn delete_all(&self) -> io::Result<()> {
        for component in Component::ALL {
            match fs::remove_file(self.path(component)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Scan a table directory for complete descriptors, deduplicated by
    /// generation.
    pub fn discover(dir: &Path) -> io::Result<Vec<Descriptor>> {
        let mut found = Vec::new();
        if !dir.exists() {
            return Ok(found);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some((descriptor, Component::Toc)) = Self::parse(&entry.path())
                && !found.contains(&descriptor)
            {
                found.push(descriptor);
            }
        }
        found.sort_by_key(|d| d.generation);
        Ok(found)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.format.as_str(),
            self.format.current_version(),
            self.generation
        )
    }
}
