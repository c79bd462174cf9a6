use alloy_sol_types::sol;

// Liquidity Book v2.1 pair: events the replica consumes plus the views the
// authoritative builder reads
sol!(
    #[derive(Debug, PartialEq, Eq)]
    contract LBPair {
        event DepositedToBins(address indexed sender, address indexed to, uint256[] ids, bytes32[] amounts);
        event WithdrawnFromBins(address indexed sender, address indexed to, uint256[] ids, bytes32[] amounts);
        event CompositionFees(address indexed sender, uint24 id, bytes32 totalFees, bytes32 protocolFees);
        event CollectedProtocolFees(address indexed feeRecipient, bytes32 protocolFees);
        event Swap(address indexed sender, address indexed to, uint24 id, bytes32 amountsIn, bytes32 amountsOut, uint24 volatilityAccumulator, bytes32 totalFees, bytes32 protocolFees);
        event StaticFeeParametersSet(address indexed sender, uint16 baseFactor, uint16 filterPeriod, uint16 decayPeriod, uint16 reductionFactor, uint24 variableFeeControl, uint16 protocolShare, uint24 maxVolatilityAccumulator);
        event FlashLoan(address indexed sender, address indexed receiver, uint24 activeId, bytes32 amounts, bytes32 totalFees, bytes32 protocolFees);
        event ForcedDecay(address indexed sender, uint24 idReference, uint24 volatilityReference);
        event OracleLengthIncreased(address indexed sender, uint16 oracleLength);
        event TransferBatch(address indexed sender, address indexed from, address indexed to, uint256[] ids, uint256[] amounts);
        event ApprovalForAll(address indexed account, address indexed sender, bool approved);

        function getTokenX() external view returns (address tokenX);
        function getTokenY() external view returns (address tokenY);
        function getBinStep() external view returns (uint16 binStep);
        function getActiveId() external view returns (uint24 activeId);
        function getReserves() external view returns (uint128 reserveX, uint128 reserveY);
        function getProtocolFees() external view returns (uint128 protocolFeeX, uint128 protocolFeeY);
        function getStaticFeeParameters() external view returns (uint16 baseFactor, uint16 filterPeriod, uint16 decayPeriod, uint16 reductionFactor, uint24 variableFeeControl, uint16 protocolShare, uint24 maxVolatilityAccumulator);
        function getVariableFeeParameters() external view returns (uint24 volatilityAccumulator, uint24 volatilityReference, uint24 idReference, uint40 timeOfLastUpdate);
        function getBin(uint24 id) external view returns (uint128 binReserveX, uint128 binReserveY);
        function getNextNonEmptyBin(bool swapForY, uint24 id) external view returns (uint24 nextId);
    }
);

// Integral TWAP relayer
sol!(
    #[derive(Debug, PartialEq, Eq)]
    contract IntegralRelayer {
        event Swap(address indexed user, address indexed tokenIn, address indexed tokenOut, uint256 amountIn, uint256 amountOut, address to);
        event SwapFeeSet(address indexed pair, uint256 fee);
        event TokenLimitMinSet(address indexed token, uint256 limit);
        event TokenLimitMaxMultiplierSet(address indexed token, uint256 limit);
        event TwapIntervalSet(address indexed pair, uint32 interval);
        event PairEnabledSet(address indexed pair, bool enabled);
        event OwnerSet(address owner);
        event RebalancerSet(address rebalancer);
        event DelaySet(address delay);

        function getPriceByPairAddress(address pair, bool inverted) external view returns (uint8 xDecimals, uint8 yDecimals, uint256 price);
        function swapFee(address pair) external view returns (uint256 fee);
        function tokenLimitMin(address token) external view returns (uint256 limit);
        function tokenLimitMaxMultiplier(address token) external view returns (uint256 multiplier);
    }
);

// ERC20
sol!(
    #[derive(Debug, PartialEq, Eq)]
    contract ERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function balanceOf(address account) external view returns (uint256 balance);
    }
);
