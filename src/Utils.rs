//! different utility modules used throughout the project
/// logger setup and csv input/output of surveys and inversion history
pub mod logger;
/// parse document with structure like " title1 key1: value1, value2 key2: value2 title2 key3:value3, value4" into an inversion task
pub mod task_parser;
/// timing of the solver stages
pub mod timer;
