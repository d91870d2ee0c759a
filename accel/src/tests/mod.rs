mod binning;
mod cancel;
mod pack;
mod refit;
mod spatial;
mod util;
