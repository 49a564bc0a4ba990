//! # Files Resolver
//!
//! Builds the catalog from local `.proto` sources with `protox`, without touching the network.
//!
//! Each input file is compiled against an include path made of every input file's own
//! directory (in input order) followed by the import directories. The first syntax or
//! semantic error aborts the whole resolution.
use super::ResolveError;
use crate::catalog::{ServiceCatalog, ServiceMeta};
use prost_types::FileDescriptorProto;
use protox::Compiler;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct FilesResolver {
    protos: Vec<PathBuf>,
    imports: Vec<PathBuf>,
}

impl FilesResolver {
    /// `protos` may mix files and directories; directories are searched recursively.
    pub fn new(protos: Vec<PathBuf>, imports: Vec<PathBuf>) -> Self {
        Self { protos, imports }
    }

    pub fn imports(&self) -> &[PathBuf] {
        &self.imports
    }

    pub fn resolve(&self) -> Result<ServiceCatalog, ResolveError> {
        let files = expand(&self.protos)?;
        let imports = canonicalize_all(&self.imports)?;

        let mut includes: Vec<PathBuf> = Vec::new();
        for dir in files
            .iter()
            .filter_map(|file| file.parent())
            .map(Path::to_path_buf)
            .chain(imports)
        {
            if !includes.contains(&dir) {
                includes.push(dir);
            }
        }

        let mut compiler = Compiler::new(&includes).map_err(ResolveError::Parse)?;
        compiler.include_imports(true);
        for file in &files {
            compiler.open_file(file).map_err(ResolveError::Parse)?;
        }

        let pool = compiler.descriptor_pool();
        let services = files
            .iter()
            .filter_map(|file| file_name(file, &includes))
            .filter_map(|name| pool.get_file_by_name(&name))
            .flat_map(|file| file.services().collect::<Vec<_>>())
            .map(ServiceMeta::from)
            .collect();

        tracing::debug!(files = files.len(), "Compiled proto sources");

        Ok(ServiceCatalog::new(
            services,
            compiler.file_descriptor_set().file,
        ))
    }
}

/// Compiles every `.proto` found under `imports`, so that types only reachable through
/// `google.protobuf.Any` can still be decoded.
pub fn additional_files(imports: &[PathBuf]) -> Result<Vec<FileDescriptorProto>, ResolveError> {
    if imports.is_empty() {
        return Ok(Vec::new());
    }

    let includes = canonicalize_all(imports)?;
    let files = expand(&includes)?;

    let mut compiler = Compiler::new(&includes).map_err(ResolveError::AdditionalFiles)?;
    compiler.include_imports(true);
    for file in &files {
        compiler
            .open_file(file)
            .map_err(ResolveError::AdditionalFiles)?;
    }

    Ok(compiler.file_descriptor_set().file)
}

/// Expands directories into their `.proto` files, canonicalizing and de-duplicating paths
/// while keeping the input order.
fn expand(paths: &[PathBuf]) -> Result<Vec<PathBuf>, ResolveError> {
    let mut files = Vec::new();

    for path in canonicalize_all(paths)? {
        if path.is_dir() {
            for entry in WalkDir::new(&path).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file() && is_proto(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path);
        }
    }

    let mut unique = Vec::with_capacity(files.len());
    for file in files {
        if !unique.contains(&file) {
            unique.push(file);
        }
    }
    Ok(unique)
}

fn canonicalize_all(paths: &[PathBuf]) -> Result<Vec<PathBuf>, ResolveError> {
    paths
        .iter()
        .map(|path| {
            std::fs::canonicalize(path).map_err(|source| ResolveError::Io {
                path: path.clone(),
                source,
            })
        })
        .collect()
}

fn is_proto(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "proto")
}

/// The name the compiler registers `file` under: its path relative to the first include
/// directory containing it.
fn file_name(file: &Path, includes: &[PathBuf]) -> Option<String> {
    includes.iter().find_map(|include| {
        let relative = file.strip_prefix(include).ok()?;
        let segments: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        Some(segments.join("/"))
    })
}

#[cfg(test)]
mod tests {
    use super::file_name;
    use std::path::PathBuf;

    #[test]
    fn names_files_after_the_first_matching_include() {
        let includes = vec![PathBuf::from("/protos"), PathBuf::from("/protos/geo")];

        assert_eq!(
            file_name(&PathBuf::from("/protos/geo/point.proto"), &includes).as_deref(),
            Some("geo/point.proto")
        );
        assert_eq!(
            file_name(&PathBuf::from("/elsewhere/point.proto"), &includes),
            None
        );
    }
}
