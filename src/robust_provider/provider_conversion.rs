use alloy::{
    network::{Ethereum, Network},
    providers::{Provider, RootProvider},
};

use crate::robust_provider::{RobustProvider, RobustProviderBuilder};

/// Conversion into the Alloy [`RootProvider`] that backs a [`RobustProvider`].
///
/// Implemented for every [`Provider`], so filled, cached and dynamic providers can all be handed
/// to [`RobustProviderBuilder`] directly.
pub trait IntoRootProvider<N: Network = Ethereum> {
    /// Convert `self` into a [`RootProvider`].
    fn into_root_provider(self) -> RootProvider<N>;
}

impl<N: Network, P: Provider<N>> IntoRootProvider<N> for P {
    fn into_root_provider(self) -> RootProvider<N> {
        self.root().clone()
    }
}

/// Conversion into a [`RobustProvider`].
///
/// Plain providers are wrapped with the default retry and timeout settings; use
/// [`RobustProviderBuilder`] directly to tune them.
pub trait IntoRobustProvider<N: Network = Ethereum> {
    /// Convert `self` into a [`RobustProvider`].
    fn into_robust_provider(self) -> RobustProvider<N>;
}

impl<N: Network, P: Provider<N>> IntoRobustProvider<N> for P {
    fn into_robust_provider(self) -> RobustProvider<N> {
        RobustProviderBuilder::new(self).build()
    }
}
