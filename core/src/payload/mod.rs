// Payload module: wire format for camera time and geotag updates

pub mod codec;
pub mod types;

pub use codec::{EncodingError, PayloadDecoder, PayloadEncoder, DATUM_WGS84};
pub use types::{LocationSample, SyncPayload, DATE_TIME_LEN, LOCATION_LEN};
