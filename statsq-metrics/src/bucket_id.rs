use std::fmt;

use sha1::{Digest, Sha1};

use crate::protocol::Dimensions;

/// A content-addressed identifier for a bucket name and its dimensions.
///
/// The identifier is the SHA-1 digest over the bucket name followed by the key and value of each
/// dimension in ascending key order. Every field is prefixed with its length as a big-endian
/// `u64`, so no two distinct names and dimension sets share an encoding. It renders as lowercase
/// hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketId([u8; 20]);

impl BucketId {
    fn generate(name: &str, dimensions: &Dimensions) -> Self {
        let mut hasher = Sha1::new();
        update_field(&mut hasher, name);
        for (key, value) in dimensions {
            update_field(&mut hasher, key);
            update_field(&mut hasher, value);
        }
        Self(hasher.finalize().into())
    }
}

fn update_field(hasher: &mut Sha1, field: &str) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field.as_bytes());
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketId({self})")
    }
}

/// An identified bucket: name, dimensions, and the [`BucketId`] derived from both.
///
/// The only way to obtain a key is [`BucketKey::new`], which computes the identifier once. There
/// is no way to change the name or dimensions afterwards, so a key can never be re-identified
/// while it is stored in the aggregator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BucketKey {
    id: BucketId,
    name: String,
    dimensions: Dimensions,
}

impl BucketKey {
    /// Identifies a bucket by name and dimensions.
    ///
    /// ```
    /// use statsq_metrics::{BucketKey, Dimensions};
    ///
    /// let key = BucketKey::new("bucketName", Dimensions::new());
    /// assert_eq!(key.id().to_string(), "f8606cd6abe9457a2d05404cb5e4f82ed656b5b0");
    /// ```
    pub fn new(name: impl Into<String>, dimensions: Dimensions) -> Self {
        let name = name.into();
        let id = BucketId::generate(&name, &dimensions);
        Self {
            id,
            name,
            dimensions,
        }
    }

    /// The identifier of this bucket.
    pub fn id(&self) -> BucketId {
        self.id
    }

    /// The bucket name, without dimensions.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dimensions of this bucket.
    pub fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }
}

/// Writes the operator-visible name of a bucket: `name` for dimensionless buckets, otherwise
/// `name_k1=v1,k2=v2` in key order.
pub fn write_wire_name(out: &mut String, name: &str, dimensions: &Dimensions) {
    out.push_str(name);

    let mut separator = '_';
    for (key, value) in dimensions {
        out.push(separator);
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        separator = ',';
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn dims(pairs: &[(&str, &str)]) -> Dimensions {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_bucket_id_plain() {
        let key = BucketKey::new("bucketName", Dimensions::new());
        assert_eq!(
            key.id().to_string(),
            "f8606cd6abe9457a2d05404cb5e4f82ed656b5b0"
        );
    }

    #[test]
    fn test_bucket_id_dimensions() {
        let key = BucketKey::new("bucketName", dims(&[("key1", "val1")]));
        assert_eq!(
            key.id().to_string(),
            "925f4e8be37e4f83f6315c84ae2ac3a4a20fbf9e"
        );

        let key = BucketKey::new("bucketName", dims(&[("key1", "val1"), ("key2", "val2")]));
        assert_eq!(
            key.id().to_string(),
            "39b38e98d470c2c6b60035649700f8150709344d"
        );
    }

    #[test]
    fn test_bucket_id_insertion_order() {
        let mut forward = Dimensions::new();
        forward.insert("key1".to_owned(), "val1".to_owned());
        forward.insert("key2".to_owned(), "val2".to_owned());

        let mut backward = Dimensions::new();
        backward.insert("key2".to_owned(), "val2".to_owned());
        backward.insert("key1".to_owned(), "val1".to_owned());

        assert_eq!(
            BucketKey::new("b", forward).id(),
            BucketKey::new("b", backward).id()
        );
    }

    #[test]
    fn test_bucket_id_distinguishes_values() {
        let a = BucketKey::new("b", dims(&[("host", "a")]));
        let b = BucketKey::new("b", dims(&[("host", "b")]));
        let plain = BucketKey::new("b", Dimensions::new());

        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), plain.id());
    }

    #[test]
    fn test_bucket_id_ambiguous_names() {
        assert_ne!(
            BucketKey::new("n", dims(&[("ame_a", "x")])).id(),
            BucketKey::new("n_ame", dims(&[("a", "x")])).id()
        );
        assert_ne!(
            BucketKey::new("b", dims(&[("k", "v_x=y")])).id(),
            BucketKey::new("b", dims(&[("k", "v"), ("x", "y")])).id()
        );
        assert_ne!(
            BucketKey::new("b_k=v", Dimensions::new()).id(),
            BucketKey::new("b", dims(&[("k", "v")])).id()
        );
    }

    #[test]
    fn test_bucket_id_debug() {
        let key = BucketKey::new("bucketName", Dimensions::new());
        assert_eq!(
            format!("{:?}", key.id()),
            "BucketId(f8606cd6abe9457a2d05404cb5e4f82ed656b5b0)"
        );
    }

    #[test]
    fn test_wire_name() {
        let mut out = String::new();
        write_wire_name(&mut out, "gorets", &Dimensions::new());
        assert_eq!(out, "gorets");

        let mut out = String::new();
        write_wire_name(&mut out, "gorets", &dims(&[("k2", "v2"), ("k1", "v1")]));
        assert_eq!(out, "gorets_k1=v1,k2=v2");
    }
}
