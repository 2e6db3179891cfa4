pub const VOX_DIR: &str = ".vox";
pub const OBJ_DIR: &str = "objects";
pub const PACK_DIR: &str = "pack";
pub const REFS_DIR: &str = "refs";
pub const HEAD_FILE: &str = "HEAD";
pub const CONFIG_FILE: &str = "config";

pub const DEFAULT_BRANCH: &str = "refs/heads/master";

pub const REFS_PREFIX: &str = "refs/";
pub const HEADS_PREFIX: &str = "refs/heads/";
pub const TAGS_PREFIX: &str = "refs/tags/";
pub const REMOTES_PREFIX: &str = "refs/remotes/";
pub const SYMREF_PREFIX: &str = "ref: ";

pub const OBJ_TYPE_BLOB: &str = "blob";
pub const OBJ_TYPE_COMMIT: &str = "commit";
pub const OBJ_TYPE_TAG: &str = "tag";
pub const OBJ_TYPE_TREE: &str = "tree";

pub const PERM_FILE: &str = "100644";
pub const PERM_DIR: &str = "40000";
pub const PERM_GITLINK: &str = "160000";
