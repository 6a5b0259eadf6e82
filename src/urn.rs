use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// Uniform resource name of a declared node.
///
/// Rendered as `urn:<project>::<qualified-type>::<name>`, where the qualified
/// type joins the types of all enclosing components with `$`, for example
/// `urn:site::quickstart:index:AwsS3Website$aws:s3:Bucket::my-bucket`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Urn {
    project: Arc<str>,
    qualified: Arc<str>,
    name: Arc<str>,
}

impl Urn {
    pub(crate) fn new(project: Arc<str>, parent: Option<&Urn>, kind: &str, name: Arc<str>) -> Self {
        let qualified = match parent {
            Some(parent) => format!("{}${}", parent.qualified, kind).into(),
            None => kind.into(),
        };

        Self {
            project,
            qualified,
            name,
        }
    }

    /// Name of the project this node was declared in.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The type token of this node, without the enclosing components.
    pub fn kind(&self) -> &str {
        self.qualified
            .rsplit_once('$')
            .map_or(&*self.qualified, |(_, kind)| kind)
    }

    /// The `$`-joined chain of component types ending with this node's type.
    pub fn qualified_kind(&self) -> &str {
        &self.qualified
    }

    /// The logical name given at declaration.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:{}::{}::{}", self.project, self.qualified, self.name)
    }
}

impl fmt::Debug for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Urn({self})")
    }
}

impl Serialize for Urn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_urn() {
        let urn = Urn::new("site".into(), None, "aws:s3:Bucket", "my-bucket".into());
        assert_eq!(urn.to_string(), "urn:site::aws:s3:Bucket::my-bucket");
        assert_eq!(urn.kind(), "aws:s3:Bucket");
        assert_eq!(urn.name(), "my-bucket");
    }

    #[test]
    fn test_nested_urn() {
        let scope = Urn::new("site".into(), None, "quickstart:index:AwsS3Website", "web".into());
        let urn = Urn::new("site".into(), Some(&scope), "aws:s3:Bucket", "my-bucket".into());

        assert_eq!(
            urn.to_string(),
            "urn:site::quickstart:index:AwsS3Website$aws:s3:Bucket::my-bucket"
        );
        assert_eq!(urn.kind(), "aws:s3:Bucket");
        assert_eq!(urn.project(), "site");
    }

    #[test]
    fn test_serialize_as_string() {
        let urn = Urn::new("p".into(), None, "t", "n".into());
        assert_eq!(serde_json::to_string(&urn).unwrap(), r#""urn:p::t::n""#);
    }
}
