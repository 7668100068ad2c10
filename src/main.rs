mod entry;

use volley::error::EngineResult;

fn main() -> EngineResult<()> {
    entry::run()
}
