//! 疎な重みの格納領域。
//!
//! 平均化パーセプトロンの累積値は遅延評価で管理します。各素性は最後に累積値を
//! 確定させた時刻を持ち、重みを変更する直前と平均化の確定時にのみ、
//! その間の重みの寄与をまとめて加算します。
//! そのため [`WeightStore::accumulate()`] は素性数によらず定数時間です。

use hashbrown::HashMap;

use crate::input::FeatureId;

#[derive(Clone, Copy, Debug, Default)]
struct Entry {
    weight: f64,

    /// 時刻 `since` までの重みの累積値
    total: f64,

    since: u64,
}

impl Entry {
    /// 時刻 `now` までの寄与を累積値に加えます。
    #[inline(always)]
    fn settle(&mut self, now: u64) {
        self.total += self.weight * (now - self.since) as f64;
        self.since = now;
    }
}

/// 素性IDから重みへの疎な対応表と、平均化のための累積値。
#[derive(Clone, Debug, Default)]
pub(crate) struct WeightStore {
    entries: HashMap<FeatureId, Entry>,

    /// [`accumulate()`](Self::accumulate) の呼び出し回数
    num_accumulated: u64,
}

impl WeightStore {
    /// 重みを返します。登録されていない素性は0です。
    #[inline(always)]
    pub fn get(&self, id: FeatureId) -> f64 {
        self.entries.get(&id).map_or(0.0, |e| e.weight)
    }

    /// 重みへの可変参照を返します。登録されていない素性は0で作成されます。
    ///
    /// 更新時にのみ使用します。
    #[inline(always)]
    pub fn get_or_insert(&mut self, id: FeatureId) -> &mut f64 {
        let now = self.num_accumulated;
        let entry = self.entries.entry(id).or_insert(Entry {
            since: now,
            ..Entry::default()
        });
        entry.settle(now);
        &mut entry.weight
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, f64)> + '_ {
        self.entries.iter().map(|(&id, e)| (id, e.weight))
    }

    /// 現在の重みを累積値に加えます。
    pub fn accumulate(&mut self) {
        self.num_accumulated += 1;
    }

    /// 重みを累積値の平均で置き換えます。
    ///
    /// 一度も累積していない場合は何もしません。
    pub fn finalize_average(&mut self) {
        let now = self.num_accumulated;
        if now == 0 {
            return;
        }
        for entry in self.entries.values_mut() {
            entry.settle(now);
            *entry = Entry {
                weight: entry.total / now as f64,
                ..Entry::default()
            };
        }
        self.num_accumulated = 0;
    }
}

impl FromIterator<(FeatureId, f64)> for WeightStore {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (FeatureId, f64)>,
    {
        Self {
            entries: iter
                .into_iter()
                .map(|(id, weight)| {
                    (
                        id,
                        Entry {
                            weight,
                            ..Entry::default()
                        },
                    )
                })
                .collect(),
            num_accumulated: 0,
        }
    }
}
