//! Namespace lookups: directory listing and path resolution
//!
//! Children carry no reference to their parent, so a path can only be
//! turned into an inode from the top down. Resolution recurses to the
//! root first and then looks each component up in its parent's omap.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::config::ExtractConfig;
use crate::error::{Result, SalvageError};
use crate::probe::is_unreachable;
use crate::record::{head_key, head_name, DirectoryEntry};
use crate::store::{list_omap, with_pool, Cluster, PoolRef, SessionOptions};
use crate::{InodeId, ROOT_INODE};

/// A path whose resolution stopped at a directory that failed its probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedPath {
    /// The prefix of the requested path that could not be probed
    pub path: PathBuf,
}

impl fmt::Display for UnresolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- bad", self.path.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(InodeId),
    Unresolved(UnresolvedPath),
}

impl Resolution {
    pub fn inode(&self) -> Option<InodeId> {
        match self {
            Resolution::Resolved(id) => Some(*id),
            Resolution::Unresolved(_) => None,
        }
    }
}

/// One omap entry of a directory, decoded or not
#[derive(Debug)]
pub struct ListedEntry {
    pub key: String,
    pub entry: Result<DirectoryEntry>,
}

impl ListedEntry {
    /// Display name, falling back to the raw key when decoding failed
    pub fn name(&self) -> &str {
        match &self.entry {
            Ok(entry) => &entry.name,
            Err(_) => head_name(&self.key).unwrap_or(&self.key),
        }
    }
}

/// List the live entries of directory `id`, paging through the omap.
/// Snapshot entries are left out.
pub fn list_entries(
    cluster: &dyn Cluster,
    config: &ExtractConfig,
    id: InodeId,
) -> Result<Vec<ListedEntry>> {
    let object = id.metadata_object();
    let raw = with_pool(
        cluster,
        &SessionOptions::default(),
        PoolRef::Name(&config.metadata_pool),
        |ioctx| list_omap(ioctx, &object, config.listing_page_size),
    )?;

    let mut listed = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        if head_name(&key).is_none() {
            tracing::debug!("Ignoring snapshot entry {:?} in {}", key, object);
            continue;
        }
        let entry = DirectoryEntry::decode(&key, &value);
        listed.push(ListedEntry { key, entry });
    }
    Ok(listed)
}

/// Resolve `path` (absolute, or relative to the root) to an inode.
///
/// A directory along the way that fails its reachability probe turns the
/// result into [`Resolution::Unresolved`] and no further lookups are made.
/// Files are never probed.
pub fn resolve(cluster: &dyn Cluster, config: &ExtractConfig, path: &Path) -> Result<Resolution> {
    let components = normalize(path);
    resolve_components(cluster, config, &components)
}

fn resolve_components(
    cluster: &dyn Cluster,
    config: &ExtractConfig,
    components: &[String],
) -> Result<Resolution> {
    let Some((name, parents)) = components.split_last() else {
        return Ok(Resolution::Resolved(ROOT_INODE));
    };

    let parent = match resolve_components(cluster, config, parents)? {
        Resolution::Resolved(id) => id,
        unresolved => return Ok(unresolved),
    };

    let key = head_key(name);
    let blob = with_pool(
        cluster,
        &SessionOptions::default(),
        PoolRef::Name(&config.metadata_pool),
        |ioctx| ioctx.omap_get(&parent.metadata_object(), &key),
    )?
    .ok_or_else(|| SalvageError::NoSuchEntry {
        parent,
        name: name.clone(),
    })?;

    let entry = DirectoryEntry::decode(&key, &blob)?;
    if entry.is_directory()
        && is_unreachable(
            cluster,
            &config.metadata_pool,
            entry.child_id,
            config.probe_timeout,
        )
    {
        let path = display_path(components);
        tracing::warn!("{} ({}) did not answer its probe", path.display(), entry.child_id);
        return Ok(Resolution::Unresolved(UnresolvedPath { path }));
    }

    tracing::debug!("Resolved {} to {}", display_path(components).display(), entry.child_id);
    Ok(Resolution::Resolved(entry.child_id))
}

/// Path components below the root, with `.` dropped and `..` applied
fn normalize(path: &Path) -> Vec<String> {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => components.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                components.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    components
}

fn display_path(components: &[String]) -> PathBuf {
    let mut path = PathBuf::from("/");
    path.extend(components);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCluster;

    const POOL: &str = "metadata";

    fn tree() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        cluster.create_pool(1, POOL);
        cluster.create_pool(2, "data");
        cluster.create_directory(POOL, ROOT_INODE);
        cluster.add_entry(POOL, ROOT_INODE, "a", InodeId::new(0x100), 0, 0);
        cluster.add_entry(POOL, InodeId::new(0x100), "b", InodeId::new(0x200), 0, 0);
        cluster.add_entry(POOL, InodeId::new(0x200), "c", InodeId::new(0x300), 2, 42);
        cluster
    }

    #[test]
    fn test_resolve_root() {
        let cluster = tree();
        let config = ExtractConfig::default();
        assert_eq!(
            resolve(&cluster, &config, Path::new("/")).unwrap(),
            Resolution::Resolved(ROOT_INODE)
        );
        assert_eq!(cluster.call_count(), 0);
    }

    #[test]
    fn test_resolve_nested_file() {
        let cluster = tree();
        let config = ExtractConfig::default();
        let resolution = resolve(&cluster, &config, Path::new("/a/b/c")).unwrap();
        assert_eq!(resolution.inode(), Some(InodeId::new(0x300)));
        assert_eq!(cluster.open_sessions(), 0);
    }

    #[test]
    fn test_relative_and_dotted_paths() {
        let cluster = tree();
        let config = ExtractConfig::default();
        assert_eq!(
            resolve(&cluster, &config, Path::new("a/./b/")).unwrap().inode(),
            Some(InodeId::new(0x200))
        );
        assert_eq!(
            resolve(&cluster, &config, Path::new("/a/b/../b/c")).unwrap().inode(),
            Some(InodeId::new(0x300))
        );
    }

    #[test]
    fn test_missing_component() {
        let cluster = tree();
        let config = ExtractConfig::default();
        match resolve(&cluster, &config, Path::new("/a/nope")) {
            Err(SalvageError::NoSuchEntry { parent, name }) => {
                assert_eq!(parent, InodeId::new(0x100));
                assert_eq!(name, "nope");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_files_are_not_probed() {
        let cluster = tree();
        let config = ExtractConfig::default();
        // file data lives elsewhere; a probe of "300.00000000" would fail
        cluster.set_unreachable("300.00000000");
        let resolution = resolve(&cluster, &config, Path::new("/a/b/c")).unwrap();
        assert_eq!(resolution.inode(), Some(InodeId::new(0x300)));
    }

    #[test]
    fn test_list_entries_skips_snapshots() {
        let cluster = tree();
        let config = ExtractConfig::default();
        cluster.set_omap(
            POOL,
            "1.00000000",
            "a_2",
            crate::store::synthesize_record(InodeId::new(0x100), 0, 0),
        );
        cluster.set_omap(POOL, "1.00000000", "junk_head", vec![1, 2, 3]);

        let listed = list_entries(&cluster, &config, ROOT_INODE).unwrap();
        let names: Vec<&str> = listed.iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["a", "junk"]);
        assert!(listed[0].entry.is_ok());
        assert!(matches!(
            listed[1].entry,
            Err(SalvageError::MalformedRecord { .. })
        ));
    }
}
