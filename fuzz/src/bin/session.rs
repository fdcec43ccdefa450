#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use tnsec_fuzz::*;

fn main() {
    let conf = session::Config::default();
    run_main(&conf, |_path, ctx, data| session::run(data, ctx))
}
