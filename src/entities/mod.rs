// Entity Models
//
// One module per persisted table. Each has:
// - a typed record built once at the storage boundary
// - `validate()` collecting every field error
// - free storage functions over `&Connection`
// - a `Tracked` impl naming its change-log table and key

pub mod dog;
pub mod dog_title;
pub mod meet;
pub mod meet_result;
pub mod race_result;
pub mod title_type;

pub use dog::{Dog, DogStatus};
pub use dog_title::DogTitle;
pub use meet::Meet;
pub use meet_result::MeetResult;
pub use race_result::RaceResult;
pub use title_type::TitleType;
