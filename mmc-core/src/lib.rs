pub mod addressing;
pub mod audio;
pub mod cdb;
pub mod constants;
pub mod device;
pub mod disc;
pub mod dispatcher;
pub mod features;
pub mod sector;
pub mod sense;
