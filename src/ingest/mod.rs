pub mod bot;
pub mod buffer;
pub mod fingerprint;
pub mod geoip;
pub mod handler;
pub mod hit;
pub mod referrer;
pub mod request;
pub mod session;
pub mod tracker;
pub mod useragent;
