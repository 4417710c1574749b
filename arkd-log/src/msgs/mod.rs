
mod rounds;
pub use self::rounds::*;
mod sweeps;
pub use self::sweeps::*;
mod system;
pub use self::system::*;
