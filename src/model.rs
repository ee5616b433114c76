mod image;
mod limits;
mod reference;
mod snapshot;
mod stream;
mod workload;

pub use self::image::{Digest, Image, MANAGED_ANNOTATION};
pub use self::limits::SizeLimit;
pub use self::reference::{
    ImageRef, RefParseError, parse_stream_image_name, parse_stream_tag_name,
};
pub use self::snapshot::Snapshot;
pub use self::stream::{ImageStream, TagHistory, TagRevision};
pub use self::workload::{
    Build, BuildConfig, BuildInput, BuildInputKind, Pod, PodController, PodPhase,
};
