mod clock;
mod custody;
mod event;
mod loan;
mod money;
mod party;

pub use clock::*;
pub use custody::*;
pub use event::*;
pub use loan::*;
pub use money::*;
pub use party::*;
