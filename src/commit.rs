//! The commit object builder (C9).

use crate::checksum::{ObjectChecksum, ObjectType};
use crate::error::{Error, Result};
use crate::repo::Repo;
use crate::transaction::CancelHandle;
use crate::variant::encode_commit;

impl Repo {
    /// Build and write a `COMMIT` object pointing at `root_contents`/
    /// `root_meta`. `branch` is only a non-empty precondition here (§4.9) —
    /// the commit variant itself carries no branch field, and writing it
    /// does **not** advance any ref; callers separately invoke
    /// [`Repo::transaction_set_ref`] to stage that. The commit is
    /// timestamped with the current UTC time.
    #[allow(clippy::too_many_arguments)]
    pub fn write_commit(
        &self,
        cancel: &CancelHandle,
        branch: &str,
        parent: Option<ObjectChecksum>,
        subject: &str,
        body: &str,
        root_contents: ObjectChecksum,
        root_meta: ObjectChecksum,
    ) -> Result<ObjectChecksum> {
        if branch.is_empty() {
            return Err(Error::io("write_commit", std::io::Error::other("branch must not be empty")));
        }
        let timestamp = chrono::Utc::now().timestamp() as u64;
        let data = encode_commit(parent, subject, body, timestamp, root_contents, root_meta);
        self.write_metadata(cancel, ObjectType::Commit, &data)
    }
}
