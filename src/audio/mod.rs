pub mod capture;
pub mod output;
pub mod pcm;
pub mod playback;
