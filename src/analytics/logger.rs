use std::sync::LazyLock;

use crate::analytics::constants::LOGGER_NAME;
use crate::logger::Logger;

pub static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new(LOGGER_NAME));
